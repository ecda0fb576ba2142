//! End-to-end dubbing of one video

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::AudioExtractor;
use crate::captions::{self, AssScript, CaptionScheduler};
use crate::config::Config;
use crate::error::DubbingError;
use crate::languages::{resolve_language, Language};
use crate::media::{FfmpegToolkit, MediaToolkit};
use crate::reconcile::{DurationReconciler, ReconcileStats, ReconciledClip};
use crate::state::{JobFailure, JobRegistry, JobStage, JobState};
use crate::synthesis::{GoogleTranslator, GoogleTts, SlotSynthesizer, SpeechSynthesizer, Translator};
use crate::timeline::{SegmentTimeline, TimelineRepairs};
use crate::track::TrackAssembler;
use crate::transcription::{create_transcriber, SRTGenerator, Transcriber, Transcript};
use crate::video::{VideoComposition, VideoProcessor};
use crate::workspace::{generate_job_id, CleanupReport, JobWorkspace};

/// The external services a job talks to, created once per process and
/// shared read-only by every job
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub media: Arc<dyn MediaToolkit>,
}

impl Collaborators {
    pub fn from_config(config: &Config) -> Result<Self> {
        let media = FfmpegToolkit::new(
            VideoProcessor::new(&config.processing.supported_extensions),
            AudioExtractor::new(config.audio.sample_rate),
            config.render.clone(),
        );

        Ok(Self {
            transcriber: create_transcriber(&config.transcription)?,
            translator: Arc::new(GoogleTranslator::new(&config.translation)?),
            synthesizer: Arc::new(GoogleTts::new(&config.synthesis)?),
            media: Arc::new(media),
        })
    }
}

/// One dubbing job
#[derive(Debug, Clone)]
pub struct DubbingRequest {
    pub video_path: PathBuf,
    /// Language code or name
    pub target_language: String,
    /// Name the caller knows the video by, defaults to the file name
    pub original_name: Option<String>,
    /// Remove `video_path` when the job ends, whatever the outcome
    pub delete_input: bool,
    pub job_id: Option<String>,
}

impl DubbingRequest {
    pub fn new(video_path: impl Into<PathBuf>, target_language: &str) -> Self {
        Self {
            video_path: video_path.into(),
            target_language: target_language.to_string(),
            original_name: None,
            delete_input: false,
            job_id: None,
        }
    }

    fn display_name(&self) -> String {
        self.original_name.clone().unwrap_or_else(|| {
            self.video_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "video".to_string())
        })
    }
}

/// Everything a successful job reports
#[derive(Debug, Clone, Serialize)]
pub struct DubbingOutcome {
    pub job_id: String,
    pub language: Language,
    pub source_text: String,
    pub translated_text: String,
    pub output_path: PathBuf,
    /// File name under the output directory
    pub download_name: String,
    pub subtitle_path: Option<PathBuf>,
    pub segment_count: usize,
    pub caption_count: usize,
    pub reconciliation: ReconcileStats,
    pub timeline_repairs: TimelineRepairs,
    pub video_duration: f64,
    pub elapsed_seconds: f64,
    pub cleanup: CleanupReport,
}

/// A failed stage and its error, before the job id is attached
struct StageError {
    stage: &'static str,
    error: DubbingError,
}

fn at(stage: &'static str) -> impl Fn(DubbingError) -> StageError {
    move |error| StageError { stage, error }
}

/// Results of the stages before cleanup
struct Rendered {
    language: Language,
    source_text: String,
    translated_text: String,
    output_path: PathBuf,
    subtitle_path: Option<PathBuf>,
    segment_count: usize,
    caption_count: usize,
    reconciliation: ReconcileStats,
    timeline_repairs: TimelineRepairs,
    video_duration: f64,
}

pub struct DubbingPipeline {
    config: Config,
    collaborators: Collaborators,
    slots: SlotSynthesizer,
    reconciler: DurationReconciler,
    video: VideoProcessor,
    registry: JobRegistry,
}

impl DubbingPipeline {
    pub fn new(config: Config, collaborators: Collaborators, registry: JobRegistry) -> Self {
        let slots = SlotSynthesizer::new(
            collaborators.translator.clone(),
            collaborators.synthesizer.clone(),
            collaborators.media.clone(),
            config.audio.sample_rate,
        );

        Self {
            reconciler: DurationReconciler::new(config.audio.sample_rate),
            video: VideoProcessor::new(&config.processing.supported_extensions),
            config,
            collaborators,
            slots,
            registry,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Dub one video.
    ///
    /// Returns the full success payload or a single failure naming the
    /// stage. Temporary files, the input (when requested) and any partial
    /// output are removed on every path.
    pub async fn run(&self, request: DubbingRequest) -> std::result::Result<DubbingOutcome, JobFailure> {
        let started = Instant::now();
        let name = request.display_name();
        let job_id = request.job_id.clone().unwrap_or_else(|| generate_job_id(&name));

        let mut state = JobState::new(&job_id, &name);
        state.target_language = Some(request.target_language.clone());
        self.registry.insert(state).await;
        info!("🚀 Job {}: dubbing {} into '{}'", job_id, name, request.target_language);

        let workspace = JobWorkspace::create(
            &self.config.storage.temp_dir,
            &job_id,
            self.config.storage.cleanup_retries,
            Duration::from_millis(self.config.storage.cleanup_retry_delay_ms),
        )
        .await;
        let mut workspace = match workspace {
            Ok(ws) => ws,
            Err(e) => {
                if request.delete_input {
                    let _ = tokio::fs::remove_file(&request.video_path).await;
                }
                let error = DubbingError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                return Err(self.fail(&job_id, StageError { stage: "workspace", error }).await);
            }
        };
        if request.delete_input {
            workspace.adopt(&request.video_path);
        }

        let result = self.execute(&request, &mut workspace).await;

        if let Ok(rendered) = &result {
            workspace.disown(&rendered.output_path);
            if let Some(srt) = &rendered.subtitle_path {
                workspace.disown(srt);
            }
        }
        let cleanup = workspace.cleanup().await;
        if !cleanup.is_complete() {
            let failed = cleanup.failed.clone();
            self.registry
                .update(&job_id, move |s| s.cleanup_failures = failed)
                .await;
        }

        match result {
            Ok(rendered) => {
                let download_name = rendered
                    .output_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let download = download_name.clone();
                let cleaned = self
                    .registry
                    .update(&job_id, move |s| {
                        s.output = Some(download);
                        s.advance(JobStage::Cleaned)
                    })
                    .await;
                if let Some(Err(e)) = cleaned {
                    warn!("Job {}: {}", job_id, e);
                }

                let elapsed_seconds = started.elapsed().as_secs_f64();
                info!("✅ Job {} finished in {:.1}s: {}", job_id, elapsed_seconds, download_name);

                Ok(DubbingOutcome {
                    job_id,
                    language: rendered.language,
                    source_text: rendered.source_text,
                    translated_text: rendered.translated_text,
                    output_path: rendered.output_path,
                    download_name,
                    subtitle_path: rendered.subtitle_path,
                    segment_count: rendered.segment_count,
                    caption_count: rendered.caption_count,
                    reconciliation: rendered.reconciliation,
                    timeline_repairs: rendered.timeline_repairs,
                    video_duration: rendered.video_duration,
                    elapsed_seconds,
                    cleanup,
                })
            }
            Err(stage_error) => Err(self.fail(&job_id, stage_error).await),
        }
    }

    async fn fail(&self, job_id: &str, stage_error: StageError) -> JobFailure {
        let StageError { stage, error } = stage_error;
        error!("❌ Job {} failed during {}: {}", job_id, stage, error);

        let message = error.to_string();
        self.registry
            .update(job_id, |s| s.fail(stage, &message))
            .await;

        JobFailure {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            error,
        }
    }

    async fn advance(&self, job_id: &str, next: JobStage) {
        if let Some(Err(e)) = self.registry.update(job_id, |s| s.advance(next)).await {
            warn!("Job {}: {}", job_id, e);
        }
    }

    fn validate(&self, request: &DubbingRequest) -> std::result::Result<Language, DubbingError> {
        let language = resolve_language(&request.target_language)?;

        if !request.video_path.is_file() {
            return Err(DubbingError::InputValidation(format!(
                "video file not found: {}",
                request.video_path.display()
            )));
        }
        let checked_name = request.original_name.as_deref().map(Path::new).unwrap_or(&request.video_path);
        if !self.video.is_supported(checked_name) {
            return Err(DubbingError::InputValidation(format!(
                "unsupported container for {}, expected one of: {}",
                checked_name.display(),
                self.video.supported_extensions().join(", ")
            )));
        }

        Ok(language)
    }

    /// Audio extraction through transcription, shared with `inspect`
    async fn transcribe(
        &self,
        video_path: &Path,
        workspace: &JobWorkspace,
    ) -> std::result::Result<(Transcript, SegmentTimeline, f64), StageError> {
        let media = &self.collaborators.media;

        let video_info = media
            .probe_video(video_path)
            .await
            .map_err(|e| DubbingError::Media(format!("{:#}", e)))
            .map_err(at("audio_extraction"))?;
        if !video_info.has_audio() {
            return Err(at("audio_extraction")(DubbingError::NoSpeechDetected));
        }
        let video_duration = video_info.duration_seconds();

        let audio_path = workspace.path("source_audio.wav");
        media
            .extract_audio(video_path, &audio_path, self.config.audio.transcription_sample_rate)
            .await
            .map_err(|e| DubbingError::Media(format!("{:#}", e)))
            .map_err(at("audio_extraction"))?;
        self.advance(workspace.job_id(), JobStage::AudioExtracted).await;

        info!("🎤 Transcribing with {}", self.collaborators.transcriber.name());
        let transcript = self
            .collaborators
            .transcriber
            .transcribe(&audio_path)
            .await
            .map_err(|e| DubbingError::Transcription(format!("{:#}", e)))
            .map_err(at("transcription"))?;

        let timeline = SegmentTimeline::from_raw(&transcript.segments, self.config.processing.overlap_policy)
            .and_then(|t| t.clip_to(video_duration))
            .and_then(|t| t.snap_to_grid(self.config.audio.sample_rate))
            .map_err(at("transcription"))?;
        if !timeline.repairs().is_clean() {
            warn!("⚠️ Repaired transcription timeline: {:?}", timeline.repairs());
        }
        info!("📝 {} segments over {:.1}s", timeline.len(), video_duration);

        Ok((transcript, timeline, video_duration))
    }

    async fn execute(
        &self,
        request: &DubbingRequest,
        workspace: &mut JobWorkspace,
    ) -> std::result::Result<Rendered, StageError> {
        let job_id = workspace.job_id().to_string();
        let language = self.validate(request).map_err(at("validation"))?;
        let sample_rate = self.config.audio.sample_rate;

        let (transcript, timeline, video_duration) = self.transcribe(&request.video_path, workspace).await?;
        self.advance(&job_id, JobStage::Transcribed).await;

        // Synthesis, reconciling each clip as it arrives in segment order
        let total = timeline.len();
        self.advance(&job_id, JobStage::Synthesizing { completed: 0, total }).await;
        let mut translations: Vec<String> = Vec::with_capacity(total);
        let mut reconciled: Vec<ReconciledClip> = Vec::with_capacity(total);
        let mut stats = ReconcileStats::default();
        {
            let clips = self.slots.synthesize_stream(
                timeline.segments(),
                &language,
                workspace.dir(),
                self.config.synthesis.max_concurrent,
            );
            futures::pin_mut!(clips);

            let mut segments = timeline.segments().iter();
            while let Some(result) = clips.next().await {
                let clip = result.map_err(at("synthesis"))?;
                let Some(segment) = segments.next() else {
                    break;
                };
                translations.push(clip.translated_text.clone());
                let fitted = self.reconciler.reconcile(clip, segment);
                stats.record(fitted.outcome);
                reconciled.push(fitted);

                let completed = reconciled.len();
                self.advance(&job_id, JobStage::Synthesizing { completed, total }).await;
            }
        }
        self.advance(&job_id, JobStage::Reconciled).await;
        debug!("Reconciliation: {:?}", stats);

        let mut assembler = TrackAssembler::new(sample_rate, self.config.audio.tolerance_samples)
            .with_capacity_for(video_duration);
        for (segment, clip) in timeline.segments().iter().zip(reconciled) {
            assembler
                .push_clip(segment, clip)
                .map_err(|e| at("assembly")(e.into()))?;
        }
        let track = assembler
            .finish(video_duration)
            .map_err(|e| at("assembly")(e.into()))?;
        let track_path = workspace.path("dubbed_track.wav");
        track
            .audio
            .write_wav(&track_path)
            .map_err(|e| at("assembly")(DubbingError::Media(format!("{:#}", e))))?;
        self.advance(&job_id, JobStage::Assembled).await;

        let overlays = CaptionScheduler::schedule(timeline.segments(), &translations);
        let mut composition = VideoComposition::from_video(&request.video_path).bind_audio(&track_path);
        if !overlays.is_empty() {
            let ass_path = workspace.path("captions.ass");
            AssScript::new(&self.config.captions.style, &overlays)
                .write_to(&ass_path)
                .await
                .map_err(|e| at("composition")(DubbingError::Render(format!("{:#}", e))))?;
            composition = composition.composite_overlays(&ass_path, self.config.captions.fonts_dir.as_deref());
        }
        self.advance(&job_id, JobStage::Composited).await;

        let output_path = self.output_path(&request.display_name(), language.code, &job_id);
        // Tracked until success so a partial render is removed
        workspace.adopt(&output_path);
        self.collaborators
            .media
            .encode(&composition, &output_path)
            .await
            .map_err(|e| at("render")(DubbingError::Render(format!("{:#}", e))))?;
        if !output_path.is_file() {
            return Err(at("render")(DubbingError::Render(format!(
                "encoder produced no file at {}",
                output_path.display()
            ))));
        }

        let subtitle_path = if self.config.captions.export_srt {
            let srt_path = output_path.with_extension("srt");
            workspace.adopt(&srt_path);
            let subtitles = captions::to_srt(&overlays);
            for issue in subtitles.validate() {
                warn!("⚠️ Subtitle export: {}", issue);
            }
            subtitles
                .save_to_file(&srt_path)
                .await
                .map_err(|e| at("render")(DubbingError::Render(format!("{:#}", e))))?;
            Some(srt_path)
        } else {
            None
        };
        self.advance(&job_id, JobStage::Rendered).await;

        let source_text = if transcript.full_text.trim().is_empty() {
            timeline.source_text()
        } else {
            transcript.full_text.trim().to_string()
        };
        let translated_text = translations
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Rendered {
            language,
            source_text,
            translated_text,
            output_path,
            subtitle_path,
            segment_count: timeline.len(),
            caption_count: overlays.len(),
            reconciliation: stats,
            timeline_repairs: timeline.repairs().clone(),
            video_duration,
        })
    }

    fn output_path(&self, display_name: &str, language_code: &str, job_id: &str) -> PathBuf {
        let stem: String = Path::new(display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let stem = if stem.is_empty() { "video".to_string() } else { stem };
        self.config
            .storage
            .output_dir
            .join(format!("dubbed_{}_{}_{}.mp4", stem, language_code, job_id))
    }

    /// Transcribe a video and return its repaired timeline without dubbing
    pub async fn inspect(&self, video_path: &Path) -> std::result::Result<(Transcript, SegmentTimeline), JobFailure> {
        let name = video_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let job_id = generate_job_id(&name);

        let mut workspace = JobWorkspace::create(
            &self.config.storage.temp_dir,
            &job_id,
            self.config.storage.cleanup_retries,
            Duration::from_millis(self.config.storage.cleanup_retry_delay_ms),
        )
        .await
        .map_err(|e| JobFailure {
            job_id: job_id.clone(),
            stage: "workspace".to_string(),
            error: DubbingError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
        })?;

        let result = self.transcribe(video_path, &workspace).await;
        workspace.cleanup().await;

        result
            .map(|(transcript, timeline, _)| (transcript, timeline))
            .map_err(|StageError { stage, error }| JobFailure {
                job_id,
                stage: stage.to_string(),
                error,
            })
    }
}

/// Sidecar subtitles of the source-language transcript
pub fn source_subtitles(timeline: &SegmentTimeline) -> SRTGenerator {
    SRTGenerator::from_segments(timeline.segments())
}
