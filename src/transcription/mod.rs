pub mod whisper;
pub mod openai;
pub mod srt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::{TranscriptionConfig, TranscriptionProvider};

pub use whisper::WhisperTranscriber;
pub use openai::OpenAiTranscriber;
pub use srt::{SRTEntry, SRTFormatter, SRTGenerator, SubtitleIssue};

/// One timestamped segment as reported by a transcription backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Complete transcription of one audio file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    /// Full recognized text
    pub full_text: String,
    /// Detected or configured language
    pub language: Option<String>,
    /// Segments in the order the backend produced them
    pub segments: Vec<RawSegment>,
}

/// Speech-to-text collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript>;
    fn name(&self) -> &str;
}

/// Create the configured transcriber
pub fn create_transcriber(config: &TranscriptionConfig) -> Result<Arc<dyn Transcriber>> {
    match config.provider {
        TranscriptionProvider::Local => Ok(Arc::new(WhisperTranscriber::new(config.clone()))),
        TranscriptionProvider::OpenAI => Ok(Arc::new(OpenAiTranscriber::new(config.clone())?)),
    }
}
