//! API data models

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::pipeline::DubbingOutcome;
use crate::state::{JobFailure, JobState};
use crate::DubbingError;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Body of a successful `POST /upload`
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub job_id: String,
    /// Relative URL the dubbed video can be fetched from
    pub dubbed_url: String,
    /// Wall-clock seconds spent on the job
    pub time_taken: f64,
    pub source_text: String,
    pub translated_text: String,
    pub language: String,
    pub segment_count: usize,
    pub caption_count: usize,
}

impl From<&DubbingOutcome> for UploadResponse {
    fn from(outcome: &DubbingOutcome) -> Self {
        Self {
            success: true,
            job_id: outcome.job_id.clone(),
            dubbed_url: format!("/download/{}", outcome.download_name),
            time_taken: (outcome.elapsed_seconds * 100.0).round() / 100.0,
            source_text: outcome.source_text.clone(),
            translated_text: outcome.translated_text.clone(),
            language: outcome.language.name.to_string(),
            segment_count: outcome.segment_count,
            caption_count: outcome.caption_count,
        }
    }
}

/// Error body for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Present when the requested language is not supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn from_error(error: &DubbingError) -> Self {
        let supported = match error {
            DubbingError::UnsupportedLanguage { supported, .. } => Some(supported.clone()),
            _ => None,
        };
        Self {
            success: false,
            error: error.to_string(),
            kind: error.kind(),
            job_id: None,
            stage: None,
            supported,
        }
    }

    pub fn from_failure(failure: &JobFailure) -> Self {
        Self {
            job_id: Some(failure.job_id.clone()),
            stage: Some(failure.stage.clone()),
            ..Self::from_error(&failure.error)
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            kind: ErrorKind::InputValidation,
            job_id: None,
            stage: None,
            supported: None,
        }
    }
}

/// Language entry for `GET /api/languages`
#[derive(Debug, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub code: String,
}

/// Job snapshot for API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub input_name: String,
    pub target_language: Option<String>,
    pub status: String,
    /// Percentage through the pipeline
    pub progress: f64,
    pub error: Option<String>,
    pub dubbed_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub elapsed_seconds: f64,
}

impl From<&JobState> for JobSummary {
    fn from(state: &JobState) -> Self {
        use crate::state::JobStage;

        let error = match &state.stage {
            JobStage::Failed { stage, message } => Some(format!("{}: {}", stage, message)),
            _ => None,
        };

        Self {
            job_id: state.job_id.clone(),
            input_name: state.input_name.clone(),
            target_language: state.target_language.clone(),
            status: state.stage.name().to_string(),
            progress: calculate_progress(&state.stage),
            error,
            dubbed_url: state.output.as_ref().map(|name| format!("/download/{}", name)),
            created_at: state.created_at.to_rfc3339(),
            updated_at: state.updated_at.to_rfc3339(),
            elapsed_seconds: state.total_seconds(),
        }
    }
}

/// Progress percentage for a job stage
pub fn calculate_progress(stage: &crate::state::JobStage) -> f64 {
    use crate::state::JobStage;

    match stage {
        JobStage::Uploaded => 0.0,
        JobStage::AudioExtracted => 10.0,
        JobStage::Transcribed => 25.0,
        JobStage::Synthesizing { completed, total } => {
            if *total == 0 {
                25.0
            } else {
                25.0 + 50.0 * (*completed as f64 / *total as f64)
            }
        }
        JobStage::Reconciled => 75.0,
        JobStage::Assembled => 80.0,
        JobStage::Composited => 85.0,
        JobStage::Rendered => 95.0,
        JobStage::Cleaned => 100.0,
        JobStage::Failed { .. } => 0.0,
    }
}

/// Registry counts for status endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub available_slots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobStage;

    #[test]
    fn test_progress_through_synthesis() {
        assert_eq!(calculate_progress(&JobStage::Uploaded), 0.0);
        assert_eq!(
            calculate_progress(&JobStage::Synthesizing { completed: 5, total: 10 }),
            50.0
        );
        assert_eq!(calculate_progress(&JobStage::Cleaned), 100.0);
    }

    #[test]
    fn test_unsupported_language_error_lists_choices() {
        let error = DubbingError::UnsupportedLanguage {
            requested: "xx".to_string(),
            supported: vec!["Hindi".to_string(), "Tamil".to_string()],
        };
        let body = serde_json::to_value(ErrorResponse::from_error(&error)).unwrap();

        assert_eq!(body["kind"], "input_validation");
        assert_eq!(body["supported"][1], "Tamil");
        assert!(body.get("job_id").is_none());
    }

    #[test]
    fn test_job_summary_reports_failure() {
        let mut state = JobState::new("abc", "talk.mp4");
        state.fail("synthesis", "segment 2 failed");
        let summary = JobSummary::from(&state);

        assert_eq!(summary.status, "failed");
        assert_eq!(summary.error.as_deref(), Some("synthesis: segment 2 failed"));
        assert!(summary.dubbed_url.is_none());
    }
}
