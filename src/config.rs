use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::captions::CaptionStyle;
use crate::timeline::OverlapPolicy;

/// Configuration for the dubbing service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Working audio format
    pub audio: AudioConfig,

    /// Input handling and timeline repair
    pub processing: ProcessingConfig,

    /// Speech-to-text settings
    pub transcription: TranscriptionConfig,

    /// Text translation settings
    pub translation: TranslationConfig,

    /// Text-to-speech settings
    pub synthesis: SynthesisConfig,

    /// Burned-in caption settings
    pub captions: CaptionsConfig,

    /// Final encode settings
    pub render: RenderConfig,

    /// Upload, output and scratch directories
    pub storage: StorageConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the assembled dubbed track
    pub sample_rate: u32,

    /// Sample rate of the audio handed to the transcriber
    pub transcription_sample_rate: u32,

    /// Allowed difference between track and video length, in samples
    pub tolerance_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            transcription_sample_rate: 16_000, // Optimal for Whisper
            tolerance_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Accepted video container extensions
    pub supported_extensions: Vec<String>,

    /// How overlapping transcription segments are handled
    pub overlap_policy: OverlapPolicy,

    /// Delete the input video once a job finishes
    pub delete_input: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            supported_extensions: vec!["mp4".to_string()],
            overlap_policy: OverlapPolicy::Trim,
            delete_input: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Transcription service provider
    pub provider: TranscriptionProvider,

    /// API endpoint for transcription service
    pub api_endpoint: Option<String>,

    /// API key for transcription service
    pub api_key: Option<String>,

    /// Model to use for transcription
    pub model: String,

    /// Directory holding ggml models for whisper.cpp
    pub model_dir: PathBuf,

    /// Source language hint
    pub language: Option<String>,

    /// Timeout for a transcription run (seconds)
    pub timeout: u64,

    /// CPU threads for local whisper
    pub threads: usize,

    /// Enable GPU acceleration for Whisper
    pub use_gpu: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: TranscriptionProvider::Local,
            api_endpoint: None,
            api_key: None,
            model: "base".to_string(),
            model_dir: PathBuf::from("models"),
            language: Some("en".to_string()),
            timeout: 3600, // 60 minutes for large files
            threads: num_cpus::get().min(8),
            use_gpu: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptionProvider {
    /// whisper.cpp or Python whisper on this machine
    Local,
    /// OpenAI-compatible HTTP endpoint
    OpenAI,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub endpoint: String,
    pub source_language: String,
    pub timeout_seconds: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://translate.googleapis.com/translate_a/single".to_string(),
            source_language: "en".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub endpoint: String,

    /// Ask the TTS service for slower speech
    pub slow: bool,

    /// Maximum characters per TTS request
    pub max_chars: usize,

    /// Segments synthesized concurrently
    pub max_concurrent: usize,

    pub timeout_seconds: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://translate.google.com/translate_tts".to_string(),
            slow: false,
            max_chars: 100,
            max_concurrent: num_cpus::get().min(8), // Use available cores, max 8
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionsConfig {
    pub style: CaptionStyle,

    /// Also write the translated captions as a sidecar .srt next to the output
    pub export_srt: bool,

    /// Directory libass searches for fonts
    pub fonts_dir: Option<PathBuf>,
}

impl Default for CaptionsConfig {
    fn default() -> Self {
        Self {
            style: CaptionStyle::default(),
            export_srt: false,
            fonts_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub preset: String,
    pub threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            preset: "medium".to_string(),
            threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,

    /// Persist job records as JSON here
    pub state_dir: Option<PathBuf>,

    /// Attempts to remove a temporary file before giving up
    pub cleanup_retries: u32,

    pub cleanup_retry_delay_ms: u64,

    /// Finished job records kept in the registry
    pub max_job_records: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./output"),
            temp_dir: PathBuf::from("./temp"),
            state_dir: None,
            cleanup_retries: 5,
            cleanup_retry_delay_ms: 1000,
            max_job_records: crate::state::DEFAULT_MAX_FINISHED_JOBS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,

    /// Jobs allowed to run at the same time
    pub max_concurrent_jobs: usize,

    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 500 * 1024 * 1024, // 500MB
            max_concurrent_jobs: 2,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let mut config_paths = vec![
            PathBuf::from("dubber.toml"),
            PathBuf::from("config/dubber.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            config_paths.push(PathBuf::from(home).join(".config/dubber/config.toml"));
        }
        config_paths.push(PathBuf::from("/etc/dubber/config.toml"));

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields with `DUBBER_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(sample_rate) = std::env::var("DUBBER_SAMPLE_RATE") {
            self.audio.sample_rate = sample_rate.parse().unwrap_or(self.audio.sample_rate);
        }

        if let Ok(workers) = std::env::var("DUBBER_SYNTHESIS_WORKERS") {
            self.synthesis.max_concurrent = workers.parse().unwrap_or(self.synthesis.max_concurrent);
        }

        if let Ok(model) = std::env::var("DUBBER_WHISPER_MODEL") {
            self.transcription.model = model;
        }

        if let Ok(api_key) = std::env::var("DUBBER_TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = Some(api_key);
        }

        if let Ok(output_dir) = std::env::var("DUBBER_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(output_dir);
        }

        if let Ok(temp_dir) = std::env::var("DUBBER_TEMP_DIR") {
            self.storage.temp_dir = PathBuf::from(temp_dir);
        }

        if let Ok(upload_dir) = std::env::var("DUBBER_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(upload_dir);
        }

        if let Ok(port) = std::env::var("DUBBER_PORT") {
            self.server.port = port.parse().unwrap_or(self.server.port);
        }

        if let Ok(log_level) = std::env::var("DUBBER_LOG_LEVEL") {
            self.server.log_level = log_level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 || self.audio.transcription_sample_rate == 0 {
            return Err(anyhow!("sample rates must be greater than 0"));
        }

        if self.synthesis.max_concurrent == 0 {
            return Err(anyhow!("synthesis.max_concurrent must be greater than 0"));
        }

        if self.synthesis.max_chars == 0 {
            return Err(anyhow!("synthesis.max_chars must be greater than 0"));
        }

        if self.server.max_concurrent_jobs == 0 {
            return Err(anyhow!("server.max_concurrent_jobs must be greater than 0"));
        }

        if self.storage.cleanup_retries == 0 {
            return Err(anyhow!("storage.cleanup_retries must be greater than 0"));
        }

        if self.processing.supported_extensions.is_empty() {
            return Err(anyhow!("processing.supported_extensions must not be empty"));
        }

        self.captions.style.validate().map_err(|e| anyhow!(e))?;

        if self.transcription.provider == TranscriptionProvider::OpenAI
            && self.transcription.api_key.is_none()
        {
            return Err(anyhow!("API key required for external transcription provider"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Create the storage directories if they are missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.storage.upload_dir,
            &self.storage.output_dir,
            &self.storage.temp_dir,
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow!("Cannot create directory {}: {}", dir.display(), e))?;
        }
        if let Some(state_dir) = &self.storage.state_dir {
            std::fs::create_dir_all(state_dir)?;
        }
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Dubber Configuration:\n\
            - Track Sample Rate: {}Hz\n\
            - Transcription: {:?} ({})\n\
            - Synthesis Workers: {}\n\
            - Overlap Policy: {:?}\n\
            - Output Directory: {}\n\
            - Temp Directory: {}\n\
            - Supported Extensions: {}",
            self.audio.sample_rate,
            self.transcription.provider,
            self.transcription.model,
            self.synthesis.max_concurrent,
            self.processing.overlap_policy,
            self.storage.output_dir.display(),
            self.storage.temp_dir.display(),
            self.processing.supported_extensions.join(", "),
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.audio.sample_rate = sample_rate;
        self
    }

    pub fn with_synthesis_workers(mut self, workers: usize) -> Self {
        self.config.synthesis.max_concurrent = workers;
        self
    }

    pub fn with_storage_root(mut self, root: PathBuf) -> Self {
        self.config.storage.upload_dir = root.join("uploads");
        self.config.storage.output_dir = root.join("output");
        self.config.storage.temp_dir = root.join("temp");
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.config.processing.overlap_policy = policy;
        self
    }

    pub fn with_cleanup_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.config.storage.cleanup_retries = retries;
        self.config.storage.cleanup_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_transcription_provider(mut self, provider: TranscriptionProvider) -> Self {
        self.config.transcription.provider = provider;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.transcription.api_key = Some(api_key);
        self
    }

    pub fn delete_input(mut self, delete: bool) -> Self {
        self.config.processing.delete_input = delete;
        self
    }

    pub fn export_srt(mut self, export: bool) -> Self {
        self.config.captions.export_srt = export;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.audio.tolerance_samples, 1);
        assert_eq!(config.processing.supported_extensions, vec!["mp4"]);
        assert_eq!(config.synthesis.max_chars, 100);
        assert_eq!(config.server.port, 5000);
        assert!(config.synthesis.max_concurrent >= 1 && config.synthesis.max_concurrent <= 8);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_sample_rate(16_000)
            .with_synthesis_workers(2)
            .with_storage_root(PathBuf::from("/tmp/dub"))
            .with_overlap_policy(OverlapPolicy::Reject)
            .build();

        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.synthesis.max_concurrent, 2);
        assert_eq!(config.storage.temp_dir, PathBuf::from("/tmp/dub/temp"));
        assert_eq!(config.processing.overlap_policy, OverlapPolicy::Reject);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let config = ConfigBuilder::new().with_synthesis_workers(0).build();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new()
            .with_transcription_provider(TranscriptionProvider::OpenAI)
            .build();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new()
            .with_transcription_provider(TranscriptionProvider::OpenAI)
            .with_api_key("sk-test".to_string())
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [audio]
            sample_rate = 48000

            [processing]
            overlap_policy = "Reject"

            [captions.style]
            font_size = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.tolerance_samples, 1);
        assert_eq!(config.processing.overlap_policy, OverlapPolicy::Reject);
        assert_eq!(config.captions.style.font_size, 32);
        assert_eq!(config.captions.style.font, "Arial");
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.storage.cleanup_retries, config.storage.cleanup_retries);
        assert_eq!(back.render.video_codec, "libx264");
    }
}
