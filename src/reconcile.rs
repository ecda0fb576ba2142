//! Duration reconciliation: force a synthesized clip to fill its slot exactly

use serde::Serialize;
use tracing::debug;

use crate::audio::{frames_for, PcmBuffer};
use crate::synthesis::SynthesizedClip;
use crate::timeline::Segment;

/// What the reconciler had to do to a clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    /// Trailing samples were cut
    Truncated { dropped: usize },
    /// Trailing silence was appended
    Padded { added: usize },
    Exact,
}

/// A clip whose length equals its slot on the sample grid
#[derive(Debug, Clone)]
pub struct ReconciledClip {
    pub segment_index: usize,
    pub audio: PcmBuffer,
    pub outcome: Reconciliation,
}

impl ReconciledClip {
    pub fn frames(&self) -> usize {
        self.audio.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.audio.duration_seconds()
    }
}

/// Running totals over a job's clips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub truncated: usize,
    pub padded: usize,
    pub exact: usize,
}

impl ReconcileStats {
    pub fn record(&mut self, outcome: Reconciliation) {
        match outcome {
            Reconciliation::Truncated { .. } => self.truncated += 1,
            Reconciliation::Padded { .. } => self.padded += 1,
            Reconciliation::Exact => self.exact += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DurationReconciler {
    sample_rate: u32,
}

impl DurationReconciler {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Slot length of a segment in frames.
    ///
    /// Both bounds are snapped to the sample grid, so consecutive slots and
    /// gaps add up to the frame of the last boundary with no rounding drift.
    /// A slot shorter than one frame still gets one frame.
    pub fn slot_frames(&self, segment: &Segment) -> usize {
        let start = frames_for(segment.start, self.sample_rate);
        let end = frames_for(segment.end, self.sample_rate);
        end.saturating_sub(start).max(1)
    }

    /// Truncate from the end or pad trailing silence until the clip fills
    /// `segment`'s slot
    pub fn reconcile(&self, clip: SynthesizedClip, segment: &Segment) -> ReconciledClip {
        let slot = self.slot_frames(segment);
        let mut audio = clip.audio;
        let natural = audio.len();

        let outcome = if natural > slot {
            audio.truncate(slot);
            Reconciliation::Truncated {
                dropped: natural - slot,
            }
        } else if natural < slot {
            audio.extend_silence(slot - natural);
            Reconciliation::Padded {
                added: slot - natural,
            }
        } else {
            Reconciliation::Exact
        };

        debug!(
            "Segment {}: {} -> {} frames ({:?})",
            clip.segment_index, natural, slot, outcome
        );

        ReconciledClip {
            segment_index: clip.segment_index,
            audio,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1_000;

    fn clip(samples: Vec<f32>) -> SynthesizedClip {
        SynthesizedClip {
            segment_index: 0,
            audio: PcmBuffer::new(samples, RATE),
            translated_text: "नमस्ते".to_string(),
        }
    }

    #[test]
    fn test_long_clip_keeps_its_beginning() {
        let samples: Vec<f32> = (0..3_000).map(|i| i as f32 / 3_000.0).collect();
        let segment = Segment::new(0, 1.0, 2.0, "hello").unwrap();
        let reconciled = DurationReconciler::new(RATE).reconcile(clip(samples.clone()), &segment);

        assert_eq!(reconciled.frames(), 1_000);
        assert_eq!(&reconciled.audio.samples[..], &samples[..1_000]);
        assert_eq!(reconciled.outcome, Reconciliation::Truncated { dropped: 2_000 });
    }

    #[test]
    fn test_short_clip_is_followed_by_silence() {
        let segment = Segment::new(0, 0.0, 1.5, "hello").unwrap();
        let reconciled = DurationReconciler::new(RATE).reconcile(clip(vec![0.7; 400]), &segment);

        assert_eq!(reconciled.frames(), 1_500);
        assert!(reconciled.audio.samples[..400].iter().all(|s| *s == 0.7));
        assert!(reconciled.audio.samples[400..].iter().all(|s| *s == 0.0));
        assert_eq!(reconciled.outcome, Reconciliation::Padded { added: 1_100 });
    }

    #[test]
    fn test_exact_clip_passes_through() {
        let segment = Segment::new(0, 2.0, 2.25, "hello").unwrap();
        let reconciled = DurationReconciler::new(RATE).reconcile(clip(vec![0.1; 250]), &segment);
        assert_eq!(reconciled.outcome, Reconciliation::Exact);
        assert_eq!(reconciled.audio.samples, vec![0.1; 250]);
    }

    #[test]
    fn test_duration_matches_slot_for_any_clip_length() {
        let reconciler = DurationReconciler::new(24_000);
        let segment = Segment::new(0, 1.234_567, 3.765_432, "hello").unwrap();
        let tolerance = 1.0 / 24_000.0;

        for natural in [0usize, 1, 999, 24_000, 60_743, 60_744, 200_000] {
            let clip = SynthesizedClip {
                segment_index: 0,
                audio: PcmBuffer::new(vec![0.2; natural], 24_000),
                translated_text: String::new(),
            };
            let reconciled = reconciler.reconcile(clip, &segment);
            assert!((reconciled.duration_seconds() - segment.duration()).abs() <= tolerance);
        }
    }

    #[test]
    fn test_sub_frame_slot_yields_one_silent_sample() {
        let segment = Segment::new(0, 1.0, 1.000_1, "uh").unwrap();
        let reconciled = DurationReconciler::new(RATE).reconcile(clip(vec![]), &segment);
        assert_eq!(reconciled.frames(), 1);
        assert_eq!(reconciled.audio.samples, vec![0.0]);
    }

    #[test]
    fn test_stats_count_outcomes() {
        let mut stats = ReconcileStats::default();
        stats.record(Reconciliation::Exact);
        stats.record(Reconciliation::Padded { added: 3 });
        stats.record(Reconciliation::Padded { added: 1 });
        assert_eq!(stats, ReconcileStats { truncated: 0, padded: 2, exact: 1 });
    }
}
