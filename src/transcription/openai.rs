use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{RawSegment, Transcriber, Transcript};
use crate::config::TranscriptionConfig;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Transcriber for OpenAI-compatible `/v1/audio/transcriptions` endpoints
pub struct OpenAiTranscriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VerboseJson {
    text: Option<String>,
    language: Option<String>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl OpenAiTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config.api_endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("Transcription API key not configured"))?;

        let bytes = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Read audio file {}", audio_path.display()))?;
        info!("🎤 Uploading {:.1} MB to {}", bytes.len() as f64 / 1_000_000.0, self.endpoint());

        let file_name = audio_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Transcription API error {}: {}", status, text));
        }

        let body: VerboseJson = response.json().await.context("Parse transcription response")?;
        debug!("Transcription API returned {} segments", body.segments.len());

        Ok(Transcript {
            full_text: body.text.unwrap_or_default().trim().to_string(),
            language: body.language.or_else(|| self.config.language.clone()),
            segments: body
                .segments
                .into_iter()
                .map(|s| RawSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint() {
        let transcriber = OpenAiTranscriber::new(TranscriptionConfig::default()).unwrap();
        assert_eq!(transcriber.endpoint(), DEFAULT_ENDPOINT);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_upload() {
        let transcriber = OpenAiTranscriber::new(TranscriptionConfig::default()).unwrap();
        let err = transcriber
            .transcribe(Path::new("/nonexistent/audio.wav"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
