use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{RawSegment, Transcriber, Transcript};
use crate::config::TranscriptionConfig;

/// Whisper backends probed in order of preference
const BACKENDS: [(&str, bool); 3] = [
    ("whisper-cli", true), // whisper.cpp via Homebrew (fastest)
    ("whisper-cpp", true), // whisper.cpp
    ("whisper", false),    // Python OpenAI Whisper (fallback)
];

/// Local Whisper transcriber driving the whisper command-line tools
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    config: TranscriptionConfig,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Run the first available Whisper backend into `output_dir`
    async fn run_whisper_command(&self, audio_path: &Path, output_dir: &Path) -> Result<WhisperOutput> {
        for (cmd_name, is_cpp) in &BACKENDS {
            if Self::check_command_available(cmd_name).await {
                debug!("Using {} backend for transcription", cmd_name);
                return if *is_cpp {
                    self.run_whisper_cpp_command(cmd_name, audio_path, output_dir).await
                } else {
                    self.run_python_whisper_command(audio_path, output_dir).await
                };
            }
        }

        error!("❌ No Whisper backend found!");
        Err(anyhow!("No Whisper backend found. Please install whisper.cpp or openai-whisper"))
    }

    /// Run whisper.cpp (C++ implementation)
    async fn run_whisper_cpp_command(
        &self,
        cmd_name: &str,
        audio_path: &Path,
        output_dir: &Path,
    ) -> Result<WhisperOutput> {
        let base_name = audio_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let output_file = output_dir.join(&base_name);
        let model_path = self.find_ggml_model();

        let mut cmd = Command::new(cmd_name);
        cmd.arg("-f").arg(audio_path)
            .arg("-oj") // JSON output
            .arg("-of").arg(&output_file)
            .arg("-t").arg(self.config.threads.to_string())
            .arg("-tp").arg("0.0")
            .arg("-m").arg(&model_path);

        if let Some(language) = &self.config.language {
            cmd.arg("-l").arg(language);
        }

        info!("🚀 Running {}: {} on {}", cmd_name, model_path.display(), audio_path.display());
        self.execute_command_and_parse(cmd, output_dir, "whisper.cpp").await
    }

    /// Locate the ggml model file for the configured model name
    fn find_ggml_model(&self) -> PathBuf {
        let file_name = format!("ggml-{}.bin", self.config.model);
        let candidates = [
            self.config.model_dir.join(&file_name),
            PathBuf::from("/usr/local/share/whisper-cpp").join(&file_name),
            PathBuf::from("/opt/homebrew/share/whisper-cpp").join(&file_name),
        ];

        candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .unwrap_or_else(|| {
                warn!("⚠️  No {} found, passing default path to whisper.cpp", file_name);
                candidates[0].clone()
            })
    }

    /// Run Python OpenAI Whisper (fallback)
    async fn run_python_whisper_command(&self, audio_path: &Path, output_dir: &Path) -> Result<WhisperOutput> {
        let mut cmd = Command::new("whisper");
        cmd.arg(audio_path)
            .arg("--model").arg(&self.config.model)
            .arg("--output_dir").arg(output_dir)
            .arg("--output_format").arg("json")
            .arg("--verbose").arg("False")
            .arg("--fp16").arg("False")
            .arg("--temperature").arg("0.0");

        if let Some(language) = &self.config.language {
            cmd.arg("--language").arg(language);
        }
        if !self.config.use_gpu {
            cmd.arg("--device").arg("cpu");
        }

        info!("🚀 Running Python Whisper: {} model on {}", self.config.model, audio_path.display());
        self.execute_command_and_parse(cmd, output_dir, "Python Whisper").await
    }

    /// Execute a backend with a timeout and parse its JSON output
    async fn execute_command_and_parse(
        &self,
        mut cmd: Command,
        output_dir: &Path,
        backend_name: &str,
    ) -> Result<WhisperOutput> {
        let timeout_duration = Duration::from_secs(self.config.timeout);
        let start_time = std::time::Instant::now();

        cmd.stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {} command: {}", backend_name, e))?;

        // whisper reports progress on stderr
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("{} stderr not captured", backend_name))?;
        let mut stderr_lines = BufReader::new(stderr).lines();

        let run = async {
            while let Some(line) = stderr_lines.next_line().await? {
                if !line.trim().is_empty() {
                    debug!("Whisper: {}", line.trim());
                }
            }
            child.wait().await
        };

        let status = match tokio::time::timeout(timeout_duration, run).await {
            Ok(status) => status?,
            Err(_) => {
                error!("⏰ {} timed out after {:.1}s", backend_name, start_time.elapsed().as_secs_f64());
                return Err(anyhow!("{} timed out after {} seconds", backend_name, self.config.timeout));
            }
        };

        if !status.success() {
            return Err(anyhow!("{} transcription failed with exit code: {}", backend_name, status));
        }
        info!("✅ {} completed in {:.1}s", backend_name, start_time.elapsed().as_secs_f64());

        let json_path = find_json_output(output_dir)
            .await?
            .ok_or_else(|| anyhow!("No {} JSON output found in {}", backend_name, output_dir.display()))?;
        let json_content = tokio::fs::read_to_string(&json_path).await?;

        serde_json::from_str::<WhisperOutput>(&json_content)
            .map_err(|e| anyhow!("Failed to parse {} JSON output: {}", backend_name, e))
    }

    /// Check if a command is available
    async fn check_command_available(cmd_name: &str) -> bool {
        Command::new(cmd_name)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Check if Whisper is available (any backend)
    pub async fn check_availability() -> Result<String> {
        for (cmd_name, is_cpp) in &BACKENDS {
            if Self::check_command_available(cmd_name).await {
                let description = if *is_cpp { "whisper.cpp" } else { "OpenAI Whisper (Python)" };
                return Ok(format!("{} available as `{}`", description, cmd_name));
            }
        }

        Err(anyhow!(
            "No Whisper backend found. Please install:\n\
            - whisper.cpp (recommended): https://github.com/ggerganov/whisper.cpp\n\
            - Or OpenAI Whisper: pip install openai-whisper"
        ))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript> {
        info!("🎤 Starting Whisper transcription for: {}", audio_path.display());

        let scratch = tempfile::Builder::new()
            .prefix("whisper_")
            .tempdir_in(audio_path.parent().unwrap_or(Path::new(".")))?;

        let output = self.run_whisper_command(audio_path, scratch.path()).await?;
        let transcript = output.into_transcript(self.config.language.clone())?;

        info!("🎉 Transcription finished: {} characters, {} segments",
              transcript.full_text.len(),
              transcript.segments.len());
        Ok(transcript)
    }

    fn name(&self) -> &str {
        "whisper"
    }
}

async fn find_json_output(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Parse "HH:MM:SS,mmm" (whisper.cpp) to seconds
fn parse_timestamp(timestamp: &str) -> Result<f64> {
    let (time_part, millis) = timestamp
        .split_once(',')
        .or_else(|| timestamp.split_once('.'))
        .ok_or_else(|| anyhow!("Invalid timestamp format: {}", timestamp))?;

    let components: Vec<&str> = time_part.split(':').collect();
    if components.len() != 3 {
        return Err(anyhow!("Invalid time format: {}", time_part));
    }

    let hours: f64 = components[0].parse()?;
    let minutes: f64 = components[1].parse()?;
    let seconds: f64 = components[2].parse()?;
    let milliseconds: f64 = millis.parse()?;

    Ok(hours * 3600.0 + minutes * 60.0 + seconds + milliseconds / 1000.0)
}

/// Whisper JSON output; covers whisper.cpp, result-wrapped and Python layouts
#[derive(Debug, Clone, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    transcription: Vec<WhisperTranscriptionSegment>,
    #[serde(default)]
    result: Option<WhisperResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperResult {
    language: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperTranscriptionSegment {
    timestamps: WhisperTimestamps,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperTimestamps {
    from: String,
    to: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl WhisperOutput {
    fn into_transcript(self, configured_language: Option<String>) -> Result<Transcript> {
        let (segments, text, language) = if !self.transcription.is_empty() {
            let segments = self
                .transcription
                .into_iter()
                .map(|seg| {
                    Ok(RawSegment {
                        start: parse_timestamp(&seg.timestamps.from)?,
                        end: parse_timestamp(&seg.timestamps.to)?,
                        text: seg.text.trim().to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let language = self.result.map(|r| r.language).or(self.language);
            (segments, self.text, language)
        } else if let Some(result) = self.result {
            (to_raw(result.segments), result.text, Some(result.language))
        } else {
            (to_raw(self.segments), self.text, self.language)
        };

        let full_text = text
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| {
                segments
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            });

        Ok(Transcript {
            full_text,
            language: language.or(configured_language),
            segments,
        })
    }
}

fn to_raw(segments: Vec<WhisperSegment>) -> Vec<RawSegment> {
    segments
        .into_iter()
        .map(|seg| RawSegment {
            start: seg.start,
            end: seg.end,
            text: seg.text.trim().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcriber_uses_configured_model() {
        let config = TranscriptionConfig::default();
        let transcriber = WhisperTranscriber::new(config);
        assert_eq!(transcriber.model(), "base");
        assert_eq!(transcriber.name(), "whisper");
    }

    #[test]
    fn test_parse_timestamp() {
        assert!((parse_timestamp("00:01:23,456").unwrap() - 83.456).abs() < 1e-9);
        assert!((parse_timestamp("01:00:00.500").unwrap() - 3600.5).abs() < 1e-9);
        assert!(parse_timestamp("garbage").is_err());
    }

    #[test]
    fn test_parse_python_layout() {
        let json = r#"{
            "text": " Hello there. General Kenobi.",
            "language": "en",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.5, "text": " Hello there."},
                {"id": 1, "start": 2.0, "end": 3.25, "text": " General Kenobi."}
            ]
        }"#;
        let output: WhisperOutput = serde_json::from_str(json).unwrap();
        let transcript = output.into_transcript(None).unwrap();

        assert_eq!(transcript.full_text, "Hello there. General Kenobi.");
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].text, "General Kenobi.");
        assert_eq!(transcript.segments[1].end, 3.25);
    }

    #[test]
    fn test_parse_whisper_cpp_layout() {
        let json = r#"{
            "result": {"language": "en"},
            "transcription": [
                {"timestamps": {"from": "00:00:01,000", "to": "00:00:02,000"},
                 "offsets": {"from": 1000, "to": 2000}, "text": " one"},
                {"timestamps": {"from": "00:00:05,000", "to": "00:00:06,500"},
                 "offsets": {"from": 5000, "to": 6500}, "text": " two"}
            ]
        }"#;
        let output: WhisperOutput = serde_json::from_str(json).unwrap();
        let transcript = output.into_transcript(Some("hi".to_string())).unwrap();

        assert_eq!(transcript.full_text, "one two");
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments[1].start, 5.0);
        assert_eq!(transcript.segments[1].end, 6.5);
    }

    #[test]
    fn test_parse_empty_output_yields_no_segments() {
        let output: WhisperOutput = serde_json::from_str(r#"{"text": "", "segments": []}"#).unwrap();
        let transcript = output.into_transcript(Some("en".to_string())).unwrap();
        assert!(transcript.segments.is_empty());
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }
}
