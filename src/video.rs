use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RenderConfig;

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: String,
    pub file_size: u64,
    pub audio_streams: Vec<AudioStreamInfo>,
}

impl VideoInfo {
    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    /// Build from `ffprobe -show_format -show_streams` JSON
    pub fn from_ffprobe(path: &Path, data: &serde_json::Value, file_size: u64) -> Result<Self> {
        let format = &data["format"];
        let streams = data["streams"]
            .as_array()
            .ok_or_else(|| anyhow!("ffprobe output has no streams"))?;

        let video_stream = streams
            .iter()
            .find(|s| s["codec_type"] == "video")
            .ok_or_else(|| anyhow!("No video stream found"))?;

        let audio_streams: Vec<AudioStreamInfo> = streams
            .iter()
            .filter(|s| s["codec_type"] == "audio")
            .enumerate()
            .map(|(index, stream)| AudioStreamInfo {
                index,
                codec: stream["codec_name"].as_str().unwrap_or("unknown").to_string(),
                sample_rate: stream["sample_rate"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(44100),
                channels: stream["channels"].as_u64().unwrap_or(2) as u32,
                duration: Duration::from_secs_f64(parse_seconds(&stream["duration"]).unwrap_or(0.0)),
            })
            .collect();

        // Container duration first, then the video stream's own
        let duration_seconds = parse_seconds(&format["duration"])
            .or_else(|| parse_seconds(&video_stream["duration"]))
            .ok_or_else(|| anyhow!("Video duration unknown for {}", path.display()))?;

        Ok(VideoInfo {
            path: path.to_path_buf(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            duration: Duration::from_secs_f64(duration_seconds),
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            fps: video_stream["r_frame_rate"]
                .as_str()
                .and_then(|s| {
                    let parts: Vec<&str> = s.split('/').collect();
                    if parts.len() == 2 {
                        let num: f64 = parts[0].parse().ok()?;
                        let den: f64 = parts[1].parse().ok()?;
                        (den != 0.0).then(|| num / den)
                    } else {
                        s.parse().ok()
                    }
                })
                .unwrap_or(0.0),
            format: format["format_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            file_size,
            audio_streams,
        })
    }
}

fn parse_seconds(value: &serde_json::Value) -> Option<f64> {
    value
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub duration: Duration,
}

/// FFmpeg-backed video inspection and rendering
#[derive(Clone)]
pub struct VideoProcessor {
    /// Supported video extensions
    supported_extensions: Vec<String>,
}

impl VideoProcessor {
    pub fn new(supported_extensions: &[String]) -> Self {
        Self {
            supported_extensions: supported_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.supported_extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn supported_extensions(&self) -> &[String] {
        &self.supported_extensions
    }

    /// Extract video information using ffprobe
    pub async fn get_video_info(&self, video_path: &Path) -> Result<VideoInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(video_path)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {}", video_path.display()));
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let file_size = tokio::fs::metadata(video_path).await?.len();
        let video_info = VideoInfo::from_ffprobe(video_path, &ffprobe_data, file_size)?;

        info!("📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.1}s)",
              video_info.filename,
              video_info.width,
              video_info.height,
              video_info.fps,
              video_info.duration_seconds());

        Ok(video_info)
    }

    /// Run the single ffmpeg pass that produces the dubbed video
    pub async fn encode(&self, composition: &VideoComposition, output_path: &Path, render: &RenderConfig) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = composition.ffmpeg_args(output_path, render);
        debug!("ffmpeg {:?}", args);
        info!("🎬 Rendering {}", output_path.display());

        let output = tokio::process::Command::new("ffmpeg")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ));
        }

        info!("✅ Rendered {}", output_path.display());
        Ok(())
    }
}

impl Default for VideoProcessor {
    fn default() -> Self {
        Self::new(&["mp4".to_string()])
    }
}

/// Description of the output video, executed by a single encode
#[derive(Debug, Clone, PartialEq)]
pub struct VideoComposition {
    pub source: PathBuf,
    pub audio: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
    pub fonts_dir: Option<PathBuf>,
}

impl VideoComposition {
    pub fn from_video(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            audio: None,
            subtitles: None,
            fonts_dir: None,
        }
    }

    /// Replace the soundtrack with `audio`
    pub fn bind_audio(mut self, audio: &Path) -> Self {
        self.audio = Some(audio.to_path_buf());
        self
    }

    /// Burn in the captions of a subtitle script
    pub fn composite_overlays(mut self, subtitles: &Path, fonts_dir: Option<&Path>) -> Self {
        self.subtitles = Some(subtitles.to_path_buf());
        self.fonts_dir = fonts_dir.map(Path::to_path_buf);
        self
    }

    pub fn ffmpeg_args(&self, output_path: &Path, render: &RenderConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-v".into(), "error".into(), "-i".into()];
        args.push(self.source.clone().into_os_string());

        if let Some(audio) = &self.audio {
            args.push("-i".into());
            args.push(audio.clone().into_os_string());
            args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(OsString::from));
        }

        if let Some(subtitles) = &self.subtitles {
            let mut filter = format!("subtitles={}", escape_filter_path(subtitles));
            if let Some(dir) = &self.fonts_dir {
                filter.push_str(":fontsdir=");
                filter.push_str(&escape_filter_path(dir));
            }
            args.push("-vf".into());
            args.push(filter.into());
        }

        args.extend(
            [
                "-c:v", render.video_codec.as_str(),
                "-preset", render.preset.as_str(),
                "-c:a", render.audio_codec.as_str(),
                "-b:a", render.audio_bitrate.as_str(),
            ]
            .map(OsString::from),
        );
        args.push("-threads".into());
        args.push(render.threads.to_string().into());
        args.push("-shortest".into());
        args.push(output_path.as_os_str().to_os_string());
        args
    }
}

/// Escape a path for use inside an ffmpeg filter argument
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('=', "\\=")
        .replace('\'', "\\'")
        .replace(',', "\\,")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_supported_extensions() {
        let processor = VideoProcessor::new(&[".MP4".to_string()]);
        assert!(processor.is_supported(Path::new("clip.mp4")));
        assert!(processor.is_supported(Path::new("CLIP.Mp4")));
        assert!(!processor.is_supported(Path::new("clip.mkv")));
        assert!(!processor.is_supported(Path::new("clip")));
    }

    #[test]
    fn test_video_info_from_ffprobe() {
        let data = json!({
            "format": { "duration": "10.000000", "format_name": "mov,mp4,m4a,3gp,3g2,mj2" },
            "streams": [
                { "codec_type": "video", "width": 1280, "height": 720, "r_frame_rate": "30000/1001" },
                { "codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "channels": 2, "duration": "9.98" }
            ]
        });
        let info = VideoInfo::from_ffprobe(Path::new("/tmp/in.mp4"), &data, 1234).unwrap();

        assert_eq!(info.filename, "in.mp4");
        assert_eq!(info.duration_seconds(), 10.0);
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!(info.has_audio());
        assert_eq!(info.audio_streams[0].sample_rate, 48_000);
    }

    #[test]
    fn test_video_info_requires_video_stream_and_duration() {
        let audio_only = json!({
            "format": { "duration": "3.0" },
            "streams": [{ "codec_type": "audio" }]
        });
        assert!(VideoInfo::from_ffprobe(Path::new("a.mp4"), &audio_only, 0).is_err());

        let no_duration = json!({
            "format": {},
            "streams": [{ "codec_type": "video" }]
        });
        assert!(VideoInfo::from_ffprobe(Path::new("a.mp4"), &no_duration, 0).is_err());
    }

    #[test]
    fn test_composition_args() {
        let composition = VideoComposition::from_video(Path::new("/in/video.mp4"))
            .bind_audio(Path::new("/tmp/job/dubbed.wav"))
            .composite_overlays(Path::new("/tmp/job/captions.ass"), None);
        let args = args_as_strings(&composition.ffmpeg_args(Path::new("/out/dubbed.mp4"), &RenderConfig::default()));

        let joined = args.join(" ");
        assert!(joined.contains("-i /in/video.mp4 -i /tmp/job/dubbed.wav -map 0:v:0 -map 1:a:0"));
        assert!(joined.contains("-vf subtitles=/tmp/job/captions.ass"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-threads 4"));
        assert_eq!(args.last().map(String::as_str), Some("/out/dubbed.mp4"));
    }

    #[test]
    fn test_filter_path_escaping() {
        assert_eq!(
            escape_filter_path(Path::new("C:/clips/it's,a=test.ass")),
            "C\\:/clips/it\\'s\\,a\\=test.ass"
        );
    }
}
