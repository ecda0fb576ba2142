//! HTTP front end for the dubbing pipeline
//!
//! Upload a video with a target language, get back a link to the dubbed
//! result. Job progress is available over REST and a websocket.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::pipeline::DubbingPipeline;

pub mod handlers;
pub mod models;
pub mod server;

/// API Server for handling REST requests and WebSocket connections
pub struct ApiServer {
    pipeline: Arc<DubbingPipeline>,
    port: u16,
}

impl ApiServer {
    pub fn new(pipeline: Arc<DubbingPipeline>, port: u16) -> Self {
        Self { pipeline, port }
    }

    /// Start the API server in the background
    pub fn start_background(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.start().await })
    }

    /// Serve until the listener fails
    pub async fn start(self) -> Result<()> {
        info!("🚀 Starting API server on port {}", self.port);
        info!("{}", self.pipeline.config().summary());
        server::start_http_server(self.pipeline, self.port).await
    }
}
