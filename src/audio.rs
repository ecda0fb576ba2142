use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Convert a time in seconds to a frame index on the sample grid
pub fn frames_for(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as usize
}

/// Convert a frame count back to seconds
pub fn seconds_for(frames: usize, sample_rate: u32) -> f64 {
    frames as f64 / sample_rate as f64
}

/// Mono PCM audio held in memory at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Buffer of `frames` zero samples
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![0.0; frames],
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        seconds_for(self.samples.len(), self.sample_rate)
    }

    /// Keep the first `frames` samples, dropping the tail
    pub fn truncate(&mut self, frames: usize) {
        self.samples.truncate(frames);
    }

    /// Append `frames` zero samples after the current end
    pub fn extend_silence(&mut self, frames: usize) {
        self.samples.resize(self.samples.len() + frames, 0.0);
    }

    pub fn append(&mut self, other: &PcmBuffer) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Read a wav file, downmixing to mono
    pub fn read_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| anyhow!("Failed to open wav {}: {}", path.display(), e))?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Write the buffer as 16-bit mono PCM wav
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| anyhow!("Failed to create wav {}: {}", path.display(), e))?;
        for sample in &self.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// A span of silence on the sample grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Silence {
    pub frames: usize,
    pub sample_rate: u32,
}

impl Silence {
    pub fn frames(frames: usize, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    /// Silence lasting `duration` seconds, rounded to the nearest frame
    pub fn from_seconds(duration: f64, sample_rate: u32) -> Self {
        Self::frames(frames_for(duration, sample_rate), sample_rate)
    }

    pub fn duration_seconds(&self) -> f64 {
        seconds_for(self.frames, self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn to_buffer(&self) -> PcmBuffer {
        PcmBuffer::silence(self.frames, self.sample_rate)
    }
}

/// Audio information and processing capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub path: PathBuf,
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u32,
    pub format: String,
    pub file_size: u64,
}

/// ffmpeg-backed audio extraction and decoding
#[derive(Debug, Clone)]
pub struct AudioExtractor {
    /// Sample rate of every buffer handed to the pipeline
    pub target_sample_rate: u32,
}

impl AudioExtractor {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    /// Extract the soundtrack of a video as mono 16-bit wav at `sample_rate`
    pub async fn extract_soundtrack(
        &self,
        video_path: &Path,
        audio_path: &Path,
        sample_rate: u32,
    ) -> Result<AudioInfo> {
        info!("🎵 Extracting audio: {}", video_path.display());

        if let Some(parent) = audio_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let status = tokio::process::Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(video_path)
            .args([
                "-vn", // No video stream
                "-acodec", "pcm_s16le",
                "-ar", &sample_rate.to_string(),
                "-ac", "1",
                "-f", "wav",
                "-y",
            ])
            .arg(audio_path)
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow!("Audio extraction failed for {}", video_path.display()));
        }

        let audio_info = self.get_audio_info(audio_path).await?;
        info!("✅ Audio extracted: {} ({:.1}s, {}Hz)",
              audio_info.path.display(),
              audio_info.duration.as_secs_f64(),
              audio_info.sample_rate);

        Ok(audio_info)
    }

    /// Decode any ffmpeg-readable clip into a mono buffer at the working rate
    pub async fn decode_to_pcm(&self, encoded_path: &Path, scratch_wav: &Path) -> Result<PcmBuffer> {
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(encoded_path)
            .args([
                "-acodec", "pcm_s16le",
                "-ar", &self.target_sample_rate.to_string(),
                "-ac", "1",
                "-f", "wav",
                "-y",
            ])
            .arg(scratch_wav)
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow!("Audio decode failed for {}", encoded_path.display()));
        }

        let pcm = PcmBuffer::read_wav(scratch_wav)?;
        if pcm.sample_rate != self.target_sample_rate {
            return Err(anyhow!(
                "Decoded clip has {}Hz, expected {}Hz",
                pcm.sample_rate,
                self.target_sample_rate
            ));
        }

        debug!("Decoded {} ({:.2}s)", encoded_path.display(), pcm.duration_seconds());
        Ok(pcm)
    }

    /// Get detailed audio information
    pub async fn get_audio_info(&self, audio_path: &Path) -> Result<AudioInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
                "-select_streams", "a:0", // First audio stream
            ])
            .arg(audio_path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {}", audio_path.display()));
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)?;

        let format = &ffprobe_data["format"];
        let audio_stream = ffprobe_data["streams"]
            .as_array()
            .and_then(|streams| streams.first())
            .ok_or_else(|| anyhow!("No audio stream found"))?;

        let duration_seconds: f64 = format["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        let file_size = tokio::fs::metadata(audio_path).await?.len();

        Ok(AudioInfo {
            path: audio_path.to_path_buf(),
            duration: Duration::from_secs_f64(duration_seconds),
            sample_rate: audio_stream["sample_rate"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(self.target_sample_rate),
            channels: audio_stream["channels"].as_u64().unwrap_or(1) as u32,
            format: audio_stream["codec_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            file_size,
        })
    }
}

impl Default for AudioExtractor {
    fn default() -> Self {
        Self::new(24_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_for_rounds_to_nearest_sample() {
        assert_eq!(frames_for(1.0, 24_000), 24_000);
        assert_eq!(frames_for(0.5, 16_000), 8_000);
        assert_eq!(frames_for(0.00002, 24_000), 0);
        assert_eq!(frames_for(-2.0, 24_000), 0);
        assert_eq!(frames_for(f64::NAN, 24_000), 0);
    }

    #[test]
    fn test_silence_from_seconds() {
        let silence = Silence::from_seconds(2.5, 1_000);
        assert_eq!(silence.frames, 2_500);
        assert!((silence.duration_seconds() - 2.5).abs() < 1e-9);
        assert!(silence.to_buffer().samples.iter().all(|s| *s == 0.0));
        assert!(Silence::from_seconds(0.0, 1_000).is_empty());
    }

    #[test]
    fn test_pcm_truncate_and_pad() {
        let mut pcm = PcmBuffer::new(vec![0.5; 10], 100);
        pcm.truncate(4);
        assert_eq!(pcm.len(), 4);
        pcm.extend_silence(6);
        assert_eq!(pcm.len(), 10);
        assert_eq!(&pcm.samples[..4], &[0.5; 4]);
        assert!(pcm.samples[4..].iter().all(|s| *s == 0.0));
        assert!((pcm.duration_seconds() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_wav_roundtrip_preserves_length_and_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..480).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();
        let pcm = PcmBuffer::new(samples, 24_000);

        pcm.write_wav(&path).unwrap();
        let back = PcmBuffer::read_wav(&path).unwrap();

        assert_eq!(back.sample_rate, 24_000);
        assert_eq!(back.len(), 480);
        assert!((back.samples[10] - pcm.samples[10]).abs() < 1e-3);
    }
}
