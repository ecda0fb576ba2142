//! Error taxonomy for dubbing jobs

use serde::Serialize;

use crate::track::TrackAssemblyError;

/// Result type for dubbing operations
pub type Result<T> = std::result::Result<T, DubbingError>;

/// Error types surfaced at the job boundary
#[derive(thiserror::Error, Debug)]
pub enum DubbingError {
    #[error("Invalid input: {0}")]
    InputValidation(String),

    #[error("Unsupported language requested: '{requested}'")]
    UnsupportedLanguage {
        requested: String,
        supported: Vec<String>,
    },

    #[error("No speech detected")]
    NoSpeechDetected,

    #[error("Media error: {0}")]
    Media(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Synthesis failed for segment {segment}: {message}")]
    Synthesis { segment: usize, message: String },

    #[error(transparent)]
    TrackAssembly(#[from] TrackAssemblyError),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputValidation,
    NoSpeechDetected,
    Media,
    Transcription,
    Synthesis,
    TrackAssembly,
    Render,
    Io,
}

impl DubbingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DubbingError::InputValidation(_) | DubbingError::UnsupportedLanguage { .. } => {
                ErrorKind::InputValidation
            }
            DubbingError::NoSpeechDetected => ErrorKind::NoSpeechDetected,
            DubbingError::Media(_) => ErrorKind::Media,
            DubbingError::Transcription(_) => ErrorKind::Transcription,
            DubbingError::Synthesis { .. } => ErrorKind::Synthesis,
            DubbingError::TrackAssembly(_) => ErrorKind::TrackAssembly,
            DubbingError::Render(_) => ErrorKind::Render,
            DubbingError::Io(_) => ErrorKind::Io,
        }
    }

    /// Errors caused by the request itself rather than by a collaborator
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InputValidation | ErrorKind::NoSpeechDetected
        )
    }

    pub(crate) fn synthesis(segment: usize, err: impl std::fmt::Display) -> Self {
        DubbingError::Synthesis {
            segment,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_language_is_input_validation() {
        let err = DubbingError::UnsupportedLanguage {
            requested: "Klingon".to_string(),
            supported: vec!["Hindi".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::InputValidation);
        assert!(err.is_client_error());
        assert!(err.to_string().contains("Klingon"));
    }

    #[test]
    fn test_collaborator_errors_are_not_client_errors() {
        let err = DubbingError::synthesis(3, "tts endpoint returned 503");
        assert_eq!(err.kind(), ErrorKind::Synthesis);
        assert!(!err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Synthesis failed for segment 3: tts endpoint returned 503"
        );
    }
}
