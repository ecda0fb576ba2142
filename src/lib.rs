/// Segment Dubber
///
/// Dubs a video into another language one transcribed segment at a time,
/// keeping every translated line on the original timeline and burning the
/// translated captions into the output.

pub mod audio;
pub mod captions;
pub mod config;
pub mod error;
pub mod languages;
pub mod media;
pub mod pipeline;
pub mod reconcile;
pub mod state;
pub mod synthesis;
pub mod timeline;
pub mod track;
pub mod transcription;
pub mod video;
pub mod workspace;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::audio::{AudioExtractor, AudioInfo, PcmBuffer, Silence};
pub use crate::captions::{AssScript, CaptionOverlay, CaptionScheduler, CaptionStyle};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{DubbingError, ErrorKind};
pub use crate::languages::{resolve_language, Language, SUPPORTED_LANGUAGES};
pub use crate::media::{FfmpegToolkit, MediaToolkit};
pub use crate::pipeline::{Collaborators, DubbingOutcome, DubbingPipeline, DubbingRequest};
pub use crate::reconcile::{DurationReconciler, ReconciledClip, Reconciliation};
pub use crate::state::{JobFailure, JobRegistry, JobStage, JobState};
pub use crate::synthesis::{SlotSynthesizer, SpeechSynthesizer, SynthesizedClip, Translator};
pub use crate::timeline::{OverlapPolicy, Segment, SegmentTimeline};
pub use crate::track::{AssembledTrack, TrackAssembler, TrackAssemblyError};
pub use crate::transcription::{RawSegment, SRTGenerator, Transcriber, Transcript};
pub use crate::video::{VideoComposition, VideoInfo, VideoProcessor};
pub use crate::workspace::JobWorkspace;
