use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use segment_dubber::synthesis::SynthesizedClip;
use segment_dubber::timeline::{OverlapPolicy, SegmentTimeline};
use segment_dubber::transcription::RawSegment;
use segment_dubber::{DurationReconciler, PcmBuffer, TrackAssembler};

const RATE: u32 = 24_000;

/// A talk-like timeline: 3s segments separated by 0.5s pauses
fn timeline(segments: usize) -> (SegmentTimeline, f64) {
    let raw: Vec<RawSegment> = (0..segments)
        .map(|i| {
            let start = i as f64 * 3.5;
            RawSegment {
                start,
                end: start + 3.0,
                text: format!("segment number {}", i),
            }
        })
        .collect();
    let duration = segments as f64 * 3.5 + 1.0;
    let timeline = SegmentTimeline::from_raw(&raw, OverlapPolicy::Trim).unwrap();
    (timeline, duration)
}

/// Clips alternating between too long and too short for their slot
fn clips(timeline: &SegmentTimeline) -> Vec<SynthesizedClip> {
    timeline
        .segments()
        .iter()
        .map(|s| {
            let seconds = if s.index % 2 == 0 { 3.4 } else { 2.1 };
            SynthesizedClip {
                segment_index: s.index,
                audio: PcmBuffer::new(vec![0.1; (seconds * RATE as f64) as usize], RATE),
                translated_text: s.source_text.clone(),
            }
        })
        .collect()
}

/// Benchmark reconciling every clip to its slot
fn bench_reconcile(c: &mut Criterion) {
    let (timeline, _) = timeline(200);
    let reconciler = DurationReconciler::new(RATE);

    c.bench_function("reconcile_200_segments", |b| {
        b.iter_batched(
            || clips(&timeline),
            |clips| {
                for (clip, segment) in clips.into_iter().zip(timeline.segments()) {
                    black_box(reconciler.reconcile(clip, segment));
                }
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

/// Benchmark laying reconciled clips and gaps onto the track
fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_assembly");
    let reconciler = DurationReconciler::new(RATE);

    for count in [10usize, 100, 400] {
        let (timeline, duration) = timeline(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter_batched(
                || {
                    clips(&timeline)
                        .into_iter()
                        .zip(timeline.segments())
                        .map(|(clip, segment)| reconciler.reconcile(clip, segment))
                        .collect::<Vec<_>>()
                },
                |reconciled| {
                    let mut assembler = TrackAssembler::new(RATE, 1).with_capacity_for(duration);
                    for (segment, clip) in timeline.segments().iter().zip(reconciled) {
                        assembler.push_clip(segment, clip).unwrap();
                    }
                    black_box(assembler.finish(black_box(duration)).unwrap())
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_assembly);
criterion_main!(benches);
