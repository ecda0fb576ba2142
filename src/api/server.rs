//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, Multipart, Path, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::time::{interval, Duration};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::handlers::{self, ReceivedUpload};
use super::models::{ApiResponse, ErrorResponse};
use crate::pipeline::DubbingPipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DubbingPipeline>,
    /// One permit per job allowed to run
    pub job_slots: Arc<Semaphore>,
}

/// Build the router with every route and layer
pub fn build_router(pipeline: Arc<DubbingPipeline>) -> Router {
    let server = &pipeline.config().server;
    let max_upload_bytes = server.max_upload_bytes;
    let job_slots = Arc::new(Semaphore::new(server.max_concurrent_jobs.max(1)));
    let output_dir = pipeline.config().storage.output_dir.clone();

    let app_state = AppState { pipeline, job_slots };

    // Configure CORS to allow browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        // Health check endpoints (both paths for compatibility)
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/api/languages", get(languages_handler))
        .route("/upload", post(upload_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .route("/api/status", get(processing_status_handler))
        .route("/ws", get(websocket_handler))
        .nest_service("/download", ServeDir::new(output_dir))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Configure and start the HTTP server
pub async fn start_http_server(pipeline: Arc<DubbingPipeline>, port: u16) -> Result<()> {
    info!("🚀 Starting HTTP server on port {}", port);

    let host = pipeline.config().server.host.clone();
    let app = build_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("🌐 API server listening on http://{}:{}", host, port);
    info!("🔗 WebSocket endpoint available at ws://{}:{}/ws", host, port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(handlers::health_check(state.pipeline.registry()).await)
}

async fn languages_handler() -> impl IntoResponse {
    Json(ApiResponse::success(handlers::list_languages()))
}

/// List jobs handler
async fn list_jobs_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(handlers::list_jobs(state.pipeline.registry()).await)
}

/// Job status handler
async fn job_status_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match handlers::get_job_status(state.pipeline.registry(), &id).await {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(format!("Job not found: {}", id))),
        )
            .into_response(),
    }
}

/// Processing status handler
async fn processing_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(handlers::get_processing_status(state.pipeline.registry(), &state.job_slots).await)
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::bad_request(message))).into_response()
}

/// Upload handler: multipart `video` plus optional `target_lang`
async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let config = state.pipeline.config();
    let mut target_lang = "hi".to_string();
    let mut upload: Option<ReceivedUpload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(format!("Malformed upload: {}", e)),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("target_lang") => match field.text().await {
                Ok(text) if !text.trim().is_empty() => {
                    let requested = text.trim();
                    if let Err(body) = handlers::check_target_language(requested) {
                        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
                    }
                    target_lang = requested.to_string();
                }
                Ok(_) => {}
                Err(e) => return bad_request(format!("Malformed target_lang: {}", e)),
            },
            Some("video") => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                if let Err(body) = handlers::check_upload_name(&original_name, &config.processing.supported_extensions) {
                    return (StatusCode::BAD_REQUEST, Json(body)).into_response();
                }
                match save_upload(field, &config.storage.upload_dir, original_name).await {
                    Ok(received) => upload = Some(received),
                    Err(e) => {
                        warn!("Failed to store upload: {}", e);
                        return bad_request(format!("Failed to receive video: {}", e));
                    }
                }
            }
            _ => {}
        }
    }

    let Some(upload) = upload else {
        return bad_request("No video file");
    };

    match handlers::dub_upload(&state.pipeline, &state.job_slots, upload, &target_lang).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

/// Stream a multipart field into a temporary file under `upload_dir`
async fn save_upload(
    mut field: axum::extract::multipart::Field<'_>,
    upload_dir: &std::path::Path,
    original_name: String,
) -> Result<ReceivedUpload> {
    let named = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(".mp4")
        .tempfile_in(upload_dir)?;
    let (file, path) = named.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut received = 0usize;
    while let Some(chunk) = field.chunk().await? {
        received += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    info!("📦 Received {} ({:.1} MB)", original_name, received as f64 / 1_048_576.0);

    Ok(ReceivedUpload { path, original_name })
}

/// WebSocket handler for real-time updates
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, state))
}

async fn job_snapshot(state: &AppState) -> Option<String> {
    let message = serde_json::json!({
        "type": "JobSnapshot",
        "status": handlers::get_processing_status(state.pipeline.registry(), &state.job_slots).await,
        "jobs": handlers::list_jobs(state.pipeline.registry()).await,
    });
    serde_json::to_string(&message).ok()
}

/// Handle WebSocket connections
async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    info!("🔌 New WebSocket connection established");

    let mut ticker = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" && socket.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("🔌 WebSocket connection closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // First tick fires immediately, giving the client an initial snapshot
            _ = ticker.tick() => {
                if let Some(text) = job_snapshot(&state).await {
                    if socket.send(Message::Text(text)).await.is_err() {
                        info!("🔌 WebSocket connection closed during status update");
                        break;
                    }
                }
            }
        }
    }

    info!("🔌 WebSocket connection ended");
}
