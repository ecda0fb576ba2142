//! Segment timeline: the ordered time slots a dubbing job has to fill

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::frames_for;
use crate::error::{DubbingError, Result};
use crate::transcription::RawSegment;

/// A timestamped span of recognized source-language speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Position in the timeline after repair
    pub index: usize,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds, always greater than `start`
    pub end: f64,
    /// Trimmed source-language text, never empty
    pub source_text: String,
    /// Transcribed start, earlier than `start` when an overlap was trimmed
    pub caption_start: f64,
}

impl Segment {
    /// Build a segment, rejecting empty windows and blank text
    pub fn new(index: usize, start: f64, end: f64, source_text: &str) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(DubbingError::InputValidation(format!(
                "segment {} has non-finite bounds",
                index
            )));
        }
        if start < 0.0 {
            return Err(DubbingError::InputValidation(format!(
                "segment {} starts before zero ({:.3}s)",
                index, start
            )));
        }
        if end <= start {
            return Err(DubbingError::InputValidation(format!(
                "segment {} ends at {:.3}s, not after its start {:.3}s",
                index, end, start
            )));
        }
        let text = source_text.trim();
        if text.is_empty() {
            return Err(DubbingError::InputValidation(format!(
                "segment {} has no text",
                index
            )));
        }

        Ok(Self {
            index,
            start,
            end,
            source_text: text.to_string(),
            caption_start: start,
        })
    }

    /// Slot duration in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Window the caption is shown in, `(start, end)` in seconds
    pub fn caption_window(&self) -> (f64, f64) {
        (self.caption_start.min(self.start), self.end)
    }
}

/// How overlapping transcription segments are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverlapPolicy {
    /// Move the later segment's start to the previous end
    #[default]
    Trim,
    /// Fail the job with an input validation error
    Reject,
}

/// Counts of defensive repairs applied while building a timeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineRepairs {
    pub dropped_empty_text: usize,
    pub dropped_invalid_bounds: usize,
    pub reordered: bool,
    pub trimmed_overlaps: usize,
    pub dropped_overlaps: usize,
    pub clipped_to_duration: usize,
    pub dropped_sub_sample: usize,
}

impl TimelineRepairs {
    pub fn is_clean(&self) -> bool {
        *self == TimelineRepairs::default()
    }
}

/// Ordered, non-overlapping segments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentTimeline {
    segments: Vec<Segment>,
    repairs: TimelineRepairs,
}

impl SegmentTimeline {
    /// Build a timeline from the transcription collaborator's raw output.
    ///
    /// Entries with blank text or an empty window are dropped, entries are
    /// sorted by start, and overlaps are resolved according to `policy`.
    /// An empty result means no speech was detected.
    pub fn from_raw(raw: &[RawSegment], policy: OverlapPolicy) -> Result<Self> {
        let mut repairs = TimelineRepairs::default();
        let mut candidates: Vec<(f64, f64, String)> = Vec::with_capacity(raw.len());

        for (i, seg) in raw.iter().enumerate() {
            let text = seg.text.trim();
            if text.is_empty() {
                repairs.dropped_empty_text += 1;
                debug!("Dropping segment {} with empty text", i);
                continue;
            }
            if !seg.start.is_finite() || !seg.end.is_finite() || seg.end <= seg.start.max(0.0) {
                repairs.dropped_invalid_bounds += 1;
                warn!("Dropping segment {} with invalid bounds [{}, {}]", i, seg.start, seg.end);
                continue;
            }
            candidates.push((seg.start.max(0.0), seg.end, text.to_string()));
        }

        if candidates.windows(2).any(|w| w[1].0 < w[0].0) {
            repairs.reordered = true;
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        }

        let mut segments: Vec<Segment> = Vec::with_capacity(candidates.len());
        for (transcribed_start, end, text) in candidates {
            let mut start = transcribed_start;
            if let Some(prev) = segments.last() {
                if start < prev.end {
                    match policy {
                        OverlapPolicy::Reject => {
                            return Err(DubbingError::InputValidation(format!(
                                "segment starting at {:.3}s overlaps previous segment ending at {:.3}s",
                                start, prev.end
                            )));
                        }
                        OverlapPolicy::Trim => {
                            if end <= prev.end {
                                repairs.dropped_overlaps += 1;
                                warn!("Dropping segment [{:.3}, {:.3}] swallowed by previous segment", start, end);
                                continue;
                            }
                            repairs.trimmed_overlaps += 1;
                            start = prev.end;
                        }
                    }
                }
            }
            let mut segment = Segment::new(segments.len(), start, end, &text)?;
            segment.caption_start = transcribed_start;
            segments.push(segment);
        }

        if segments.is_empty() {
            return Err(DubbingError::NoSpeechDetected);
        }

        Ok(Self { segments, repairs })
    }

    /// Drop segments starting at or after `duration` and clamp ends to it
    pub fn clip_to(mut self, duration: f64) -> Result<Self> {
        let before = self.segments.len();
        self.segments.retain(|s| s.start < duration);
        let mut clipped = before - self.segments.len();

        for seg in &mut self.segments {
            if seg.end > duration {
                seg.end = duration;
                clipped += 1;
            }
        }

        if clipped > 0 {
            warn!("Clipped {} segments to the video duration {:.3}s", clipped, duration);
            self.repairs.clipped_to_duration += clipped;
        }
        if self.segments.is_empty() {
            return Err(DubbingError::NoSpeechDetected);
        }

        self.renumber();
        Ok(self)
    }

    /// Drop segments whose bounds land on the same sample at `sample_rate`.
    ///
    /// Every remaining slot covers at least one frame, so slots and gaps
    /// add up to the frame of the video end.
    pub fn snap_to_grid(mut self, sample_rate: u32) -> Result<Self> {
        let before = self.segments.len();
        self.segments
            .retain(|s| frames_for(s.end, sample_rate) > frames_for(s.start, sample_rate));
        let dropped = before - self.segments.len();

        if dropped > 0 {
            warn!("Dropped {} segments shorter than one sample at {}Hz", dropped, sample_rate);
            self.repairs.dropped_sub_sample += dropped;
        }
        if self.segments.is_empty() {
            return Err(DubbingError::NoSpeechDetected);
        }

        self.renumber();
        Ok(self)
    }

    fn renumber(&mut self) {
        for (i, seg) in self.segments.iter_mut().enumerate() {
            seg.index = i;
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn repairs(&self) -> &TimelineRepairs {
        &self.repairs
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End of the last segment, in seconds
    pub fn end(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }

    /// Source text joined in timeline order
    pub fn source_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.source_text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: f64, end: f64, text: &str) -> RawSegment {
        RawSegment {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_segment_rejects_bad_windows() {
        assert!(Segment::new(0, 2.0, 2.0, "x").is_err());
        assert!(Segment::new(0, 3.0, 2.0, "x").is_err());
        assert!(Segment::new(0, -1.0, 2.0, "x").is_err());
        assert!(Segment::new(0, 1.0, 2.0, "   ").is_err());
        let seg = Segment::new(0, 1.0, 2.5, "  hello ").unwrap();
        assert_eq!(seg.source_text, "hello");
        assert!((seg.duration() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_transcript_is_no_speech() {
        let err = SegmentTimeline::from_raw(&[], OverlapPolicy::Trim).unwrap_err();
        assert!(matches!(err, DubbingError::NoSpeechDetected));

        let blank = vec![raw(0.0, 1.0, "  "), raw(1.0, 2.0, "")];
        let err = SegmentTimeline::from_raw(&blank, OverlapPolicy::Trim).unwrap_err();
        assert!(matches!(err, DubbingError::NoSpeechDetected));
    }

    #[test]
    fn test_invalid_entries_are_dropped() {
        let input = vec![
            raw(0.0, 1.0, "first"),
            raw(2.0, 2.0, "zero length"),
            raw(3.0, 2.5, "backwards"),
            raw(4.0, 5.0, " "),
            raw(6.0, 7.0, "last"),
        ];
        let timeline = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.repairs().dropped_invalid_bounds, 2);
        assert_eq!(timeline.repairs().dropped_empty_text, 1);
        assert_eq!(timeline.segments()[1].index, 1);
        assert_eq!(timeline.source_text(), "first last");
    }

    #[test]
    fn test_out_of_order_segments_are_sorted() {
        let input = vec![raw(5.0, 6.0, "b"), raw(1.0, 2.0, "a")];
        let timeline = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim).unwrap();
        assert!(timeline.repairs().reordered);
        assert_eq!(timeline.segments()[0].source_text, "a");
        assert_eq!(timeline.segments()[1].start, 5.0);
    }

    #[test]
    fn test_overlap_trim_policy() {
        let input = vec![
            raw(1.0, 3.0, "a"),
            raw(2.5, 4.0, "b"),
            raw(3.0, 3.5, "swallowed"),
        ];
        let timeline = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.segments()[1].start, 3.0);
        assert_eq!(timeline.segments()[1].end, 4.0);
        // The caption keeps the transcribed window
        assert_eq!(timeline.segments()[1].caption_window(), (2.5, 4.0));
        assert_eq!(timeline.segments()[0].caption_window(), (1.0, 3.0));
        assert_eq!(timeline.repairs().trimmed_overlaps, 1);
        assert_eq!(timeline.repairs().dropped_overlaps, 1);
    }

    #[test]
    fn test_overlap_reject_policy() {
        let input = vec![raw(1.0, 3.0, "a"), raw(2.5, 4.0, "b")];
        let err = SegmentTimeline::from_raw(&input, OverlapPolicy::Reject).unwrap_err();
        assert!(matches!(err, DubbingError::InputValidation(_)));
    }

    #[test]
    fn test_clip_to_video_duration() {
        let input = vec![raw(1.0, 2.0, "a"), raw(9.0, 11.0, "b"), raw(12.0, 13.0, "c")];
        let timeline = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim)
            .unwrap()
            .clip_to(10.0)
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.end(), 10.0);
        assert_eq!(timeline.repairs().clipped_to_duration, 2);

        let late = vec![raw(12.0, 13.0, "c")];
        let err = SegmentTimeline::from_raw(&late, OverlapPolicy::Trim)
            .unwrap()
            .clip_to(10.0)
            .unwrap_err();
        assert!(matches!(err, DubbingError::NoSpeechDetected));
    }

    #[test]
    fn test_sub_sample_segments_leave_the_track_exact() {
        use crate::audio::PcmBuffer;
        use crate::reconcile::DurationReconciler;
        use crate::synthesis::SynthesizedClip;
        use crate::track::TrackAssembler;

        let rate = 24_000;
        let input = vec![
            raw(1.0, 2.0, "Hello"),
            raw(9.999_90, 9.999_91, "a"),
            raw(9.999_91, 9.999_92, "b"),
            raw(9.999_92, 9.999_93, "c"),
            raw(9.999_93, 9.999_94, "d"),
        ];
        let timeline = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim)
            .unwrap()
            .clip_to(10.0)
            .unwrap()
            .snap_to_grid(rate)
            .unwrap();

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.repairs().dropped_sub_sample, 3);
        assert_eq!(timeline.segments()[1].source_text, "d");
        assert_eq!(timeline.segments()[1].index, 1);

        let reconciler = DurationReconciler::new(rate);
        let mut assembler = TrackAssembler::new(rate, 1);
        for segment in timeline.segments() {
            let clip = SynthesizedClip {
                segment_index: segment.index,
                audio: PcmBuffer::new(vec![0.5; 500], rate),
                translated_text: segment.source_text.clone(),
            };
            assembler.push_clip(segment, reconciler.reconcile(clip, segment)).unwrap();
        }
        let track = assembler.finish(10.0).unwrap();
        assert_eq!(track.audio.len(), 240_000);
    }

    #[test]
    fn test_only_sub_sample_segments_is_no_speech() {
        let input = vec![raw(3.0, 3.000_01, "blip")];
        let err = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim)
            .unwrap()
            .snap_to_grid(24_000)
            .unwrap_err();
        assert!(matches!(err, DubbingError::NoSpeechDetected));
    }

    #[test]
    fn test_clean_input_reports_no_repairs() {
        let input = vec![raw(1.0, 2.0, "a"), raw(5.0, 6.0, "b")];
        let timeline = SegmentTimeline::from_raw(&input, OverlapPolicy::Trim).unwrap();
        assert!(timeline.repairs().is_clean());
    }
}
