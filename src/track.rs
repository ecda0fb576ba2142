//! Gap filling and track assembly on the working sample grid

use serde::Serialize;
use tracing::{debug, info};

use crate::audio::{frames_for, PcmBuffer, Silence};
use crate::reconcile::ReconciledClip;
use crate::timeline::Segment;

/// Fatal problems found while building the dubbed track
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackAssemblyError {
    #[error("Assembled track has {actual_samples} samples, expected {expected_samples} (tolerance {tolerance})")]
    DurationMismatch {
        expected_samples: usize,
        actual_samples: usize,
        tolerance: usize,
    },

    #[error("Clip for segment {segment_index} has no audio but a non-zero slot")]
    MalformedClip { segment_index: usize },

    #[error("Clip for segment {segment_index} is {actual}Hz, track is {expected}Hz")]
    SampleRateMismatch {
        segment_index: usize,
        expected: u32,
        actual: u32,
    },
}

/// Silence needed between the end of the previous clip and the next segment.
///
/// Overlapping input clamps to zero, and a zero-length gap is omitted.
pub fn gap_before(previous_end_frame: usize, next_start_frame: usize, sample_rate: u32) -> Option<Silence> {
    let frames = next_start_frame.saturating_sub(previous_end_frame);
    (frames > 0).then(|| Silence::frames(frames, sample_rate))
}

/// Silence from the end of the last clip to the end of the video
pub fn trailing_gap(last_end_frame: usize, video_frames: usize, sample_rate: u32) -> Option<Silence> {
    gap_before(last_end_frame, video_frames, sample_rate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpanKind {
    Silence,
    Clip { segment_index: usize },
}

/// One span of the finished track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacedSpan {
    pub kind: SpanKind,
    pub start_frame: usize,
    pub frames: usize,
}

impl PlacedSpan {
    pub fn end_frame(&self) -> usize {
        self.start_frame + self.frames
    }
}

/// The continuous dubbed audio stream plus its layout
#[derive(Debug, Clone)]
pub struct AssembledTrack {
    pub audio: PcmBuffer,
    pub spans: Vec<PlacedSpan>,
}

impl AssembledTrack {
    pub fn duration_seconds(&self) -> f64 {
        self.audio.duration_seconds()
    }

    pub fn silence_spans(&self) -> impl Iterator<Item = &PlacedSpan> {
        self.spans.iter().filter(|s| s.kind == SpanKind::Silence)
    }

    pub fn clip_spans(&self) -> impl Iterator<Item = &PlacedSpan> {
        self.spans
            .iter()
            .filter(|s| matches!(s.kind, SpanKind::Clip { .. }))
    }
}

/// Concatenates silence and reconciled clips in segment order
#[derive(Debug)]
pub struct TrackAssembler {
    sample_rate: u32,
    tolerance_samples: usize,
    cursor: usize,
    audio: PcmBuffer,
    spans: Vec<PlacedSpan>,
}

impl TrackAssembler {
    pub fn new(sample_rate: u32, tolerance_samples: usize) -> Self {
        Self {
            sample_rate,
            tolerance_samples,
            cursor: 0,
            audio: PcmBuffer::new(Vec::new(), sample_rate),
            spans: Vec::new(),
        }
    }

    /// Pre-size the buffer for a video of `duration` seconds
    pub fn with_capacity_for(mut self, duration: f64) -> Self {
        self.audio.samples.reserve(frames_for(duration, self.sample_rate));
        self
    }

    fn push_silence(&mut self, silence: Silence) {
        self.spans.push(PlacedSpan {
            kind: SpanKind::Silence,
            start_frame: self.cursor,
            frames: silence.frames,
        });
        self.audio.extend_silence(silence.frames);
        self.cursor += silence.frames;
    }

    /// Fill the gap up to `segment` and append its clip
    pub fn push_clip(&mut self, segment: &Segment, clip: ReconciledClip) -> Result<(), TrackAssemblyError> {
        if clip.audio.sample_rate != self.sample_rate {
            return Err(TrackAssemblyError::SampleRateMismatch {
                segment_index: clip.segment_index,
                expected: self.sample_rate,
                actual: clip.audio.sample_rate,
            });
        }
        if clip.audio.is_empty() && segment.duration() > 0.0 {
            return Err(TrackAssemblyError::MalformedClip {
                segment_index: clip.segment_index,
            });
        }

        let start_frame = frames_for(segment.start, self.sample_rate);
        if let Some(gap) = gap_before(self.cursor, start_frame, self.sample_rate) {
            self.push_silence(gap);
        }

        let frames = clip.audio.len();
        self.spans.push(PlacedSpan {
            kind: SpanKind::Clip {
                segment_index: clip.segment_index,
            },
            start_frame: self.cursor,
            frames,
        });
        self.audio.append(&clip.audio);
        self.cursor += frames;
        Ok(())
    }

    /// Append the trailing gap and check the global duration
    pub fn finish(mut self, video_duration: f64) -> Result<AssembledTrack, TrackAssemblyError> {
        let expected = frames_for(video_duration, self.sample_rate);
        if let Some(gap) = trailing_gap(self.cursor, expected, self.sample_rate) {
            self.push_silence(gap);
        }

        let actual = self.audio.len();
        if actual.abs_diff(expected) > self.tolerance_samples {
            return Err(TrackAssemblyError::DurationMismatch {
                expected_samples: expected,
                actual_samples: actual,
                tolerance: self.tolerance_samples,
            });
        }

        debug!("Track layout: {} spans", self.spans.len());
        info!("🎚️ Assembled track: {:.3}s ({} samples)", self.audio.duration_seconds(), actual);

        Ok(AssembledTrack {
            audio: self.audio,
            spans: self.spans,
        })
    }
}
