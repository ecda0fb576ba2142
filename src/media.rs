//! Video/audio decode-encode collaborator

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::audio::{AudioExtractor, AudioInfo, PcmBuffer};
use crate::config::RenderConfig;
use crate::video::{VideoComposition, VideoInfo, VideoProcessor};

/// Everything the pipeline needs from a media toolchain
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe_video(&self, video_path: &Path) -> Result<VideoInfo>;

    /// Write the soundtrack of `video_path` as mono wav at `sample_rate`
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path, sample_rate: u32) -> Result<AudioInfo>;

    /// Decode an encoded clip into a buffer at the working sample rate
    async fn decode_audio(&self, encoded_path: &Path, scratch_wav: &Path) -> Result<PcmBuffer>;

    async fn encode(&self, composition: &VideoComposition, output_path: &Path) -> Result<()>;
}

/// ffmpeg/ffprobe implementation
pub struct FfmpegToolkit {
    video: VideoProcessor,
    audio: AudioExtractor,
    render: RenderConfig,
}

impl FfmpegToolkit {
    pub fn new(video: VideoProcessor, audio: AudioExtractor, render: RenderConfig) -> Self {
        Self { video, audio, render }
    }

    /// Check that ffmpeg and ffprobe are on PATH
    pub async fn check_availability() -> bool {
        for tool in ["ffmpeg", "ffprobe"] {
            let ok = tokio::process::Command::new(tool)
                .arg("-version")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if !ok {
                tracing::warn!("⚠️ {} not found on PATH", tool);
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe_video(&self, video_path: &Path) -> Result<VideoInfo> {
        self.video.get_video_info(video_path).await
    }

    async fn extract_audio(&self, video_path: &Path, audio_path: &Path, sample_rate: u32) -> Result<AudioInfo> {
        self.audio.extract_soundtrack(video_path, audio_path, sample_rate).await
    }

    async fn decode_audio(&self, encoded_path: &Path, scratch_wav: &Path) -> Result<PcmBuffer> {
        self.audio.decode_to_pcm(encoded_path, scratch_wav).await
    }

    async fn encode(&self, composition: &VideoComposition, output_path: &Path) -> Result<()> {
        self.video.encode(composition, output_path, &self.render).await
    }
}
