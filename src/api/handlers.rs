//! API request handlers

use axum::http::StatusCode;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::sync::Semaphore;
use tracing::info;

use super::models::{ErrorResponse, JobSummary, LanguageInfo, ProcessingStatus, UploadResponse};
use crate::error::DubbingError;
use crate::languages::{resolve_language, Language, SUPPORTED_LANGUAGES};
use crate::pipeline::{DubbingPipeline, DubbingRequest};
use crate::state::JobRegistry;

/// Handle health check requests
pub async fn health_check(registry: &JobRegistry) -> Value {
    let stats = registry.stats().await;
    serde_json::json!({
        "status": "healthy",
        "service": "segment-dubber",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": stats,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })
}

/// Supported target languages, sorted by name
pub fn list_languages() -> Vec<LanguageInfo> {
    let mut languages: Vec<LanguageInfo> = SUPPORTED_LANGUAGES
        .iter()
        .map(|l| LanguageInfo {
            name: l.name.to_string(),
            code: l.code.to_string(),
        })
        .collect();
    languages.sort_by(|a, b| a.name.cmp(&b.name));
    languages
}

/// Handle job listing requests
pub async fn list_jobs(registry: &JobRegistry) -> Vec<JobSummary> {
    registry.list().await.iter().map(JobSummary::from).collect()
}

/// Handle job status requests
pub async fn get_job_status(registry: &JobRegistry, job_id: &str) -> Option<JobSummary> {
    registry.get(job_id).await.as_ref().map(JobSummary::from)
}

/// Handle processing status requests
pub async fn get_processing_status(registry: &JobRegistry, slots: &Semaphore) -> ProcessingStatus {
    let stats = registry.stats().await;
    ProcessingStatus {
        total_jobs: stats.total,
        running_jobs: stats.running,
        completed_jobs: stats.completed,
        failed_jobs: stats.failed,
        available_slots: slots.available_permits(),
    }
}

/// A video received through `POST /upload`, removed when dropped
pub struct ReceivedUpload {
    pub path: TempPath,
    /// File name as sent by the client
    pub original_name: String,
}

/// Reject uploads whose client-side name has an unsupported extension
pub fn check_upload_name(file_name: &str, supported_extensions: &[String]) -> Result<(), ErrorResponse> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if supported_extensions.iter().any(|s| s.eq_ignore_ascii_case(&extension)) {
        Ok(())
    } else {
        let allowed: Vec<String> = supported_extensions.iter().map(|e| format!(".{}", e)).collect();
        Err(ErrorResponse::bad_request(format!("Only {} allowed", allowed.join(", "))))
    }
}

/// Resolve the requested language, answering with the supported list when
/// it is unknown
pub fn check_target_language(target_lang: &str) -> Result<Language, ErrorResponse> {
    resolve_language(target_lang).map_err(|e| ErrorResponse::from_error(&e))
}

/// HTTP status for a job error
pub fn status_for(error: &DubbingError) -> StatusCode {
    if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Handle a dubbing request for an uploaded video.
///
/// An unknown language is refused before waiting for a job slot. The
/// upload is deleted on every path.
pub async fn dub_upload(
    pipeline: &Arc<DubbingPipeline>,
    slots: &Semaphore,
    upload: ReceivedUpload,
    target_lang: &str,
) -> Result<UploadResponse, (StatusCode, ErrorResponse)> {
    check_target_language(target_lang).map_err(|body| (StatusCode::BAD_REQUEST, body))?;

    let _permit = slots.acquire().await.map_err(|_| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::from_error(&DubbingError::Render("server is shutting down".to_string())),
        )
    })?;

    let mut request = DubbingRequest::new(upload.path.to_path_buf(), target_lang);
    request.original_name = Some(upload.original_name.clone());
    request.delete_input = true;

    info!("📥 Upload {} → {}", upload.original_name, target_lang);
    let result = pipeline.run(request).await;
    // Already removed by the job; this only covers a failed removal
    drop(upload.path);

    match result {
        Ok(outcome) => Ok(UploadResponse::from(&outcome)),
        Err(failure) => Err((status_for(&failure.error), ErrorResponse::from_failure(&failure))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_name_check() {
        let supported = vec!["mp4".to_string()];
        assert!(check_upload_name("talk.mp4", &supported).is_ok());
        assert!(check_upload_name("TALK.MP4", &supported).is_ok());

        let err = check_upload_name("talk.mov", &supported).unwrap_err();
        assert_eq!(err.error, "Only .mp4 allowed");
        assert!(check_upload_name("noextension", &supported).is_err());
    }

    #[test]
    fn test_target_language_check() {
        assert_eq!(check_target_language("Tamil").unwrap().code, "ta");
        assert_eq!(check_target_language("BN").unwrap().code, "bn");

        let body = check_target_language("Klingon").unwrap_err();
        assert_eq!(body.kind, crate::error::ErrorKind::InputValidation);
        let supported = body.supported.unwrap();
        assert!(supported.iter().any(|s| s == "Hindi"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&DubbingError::NoSpeechDetected), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&DubbingError::Transcription("model missing".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_languages_are_sorted() {
        let languages = list_languages();
        assert_eq!(languages.len(), SUPPORTED_LANGUAGES.len());
        assert!(languages.windows(2).all(|w| w[0].name <= w[1].name));
    }

    #[tokio::test]
    async fn test_processing_status_counts_slots() {
        let registry = JobRegistry::in_memory();
        registry.insert(crate::state::JobState::new("a", "a.mp4")).await;
        let slots = Semaphore::new(2);

        let status = get_processing_status(&registry, &slots).await;
        assert_eq!(status.total_jobs, 1);
        assert_eq!(status.running_jobs, 1);
        assert_eq!(status.available_slots, 2);
    }
}
