//! Segment boundary planning.

use crate::track::Sample;

/// One output segment: a contiguous run of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentPlan {
    pub start_sample: usize,
    /// Exclusive.
    pub end_sample: usize,
    pub start_time: u64,
    pub duration: u64,
}

impl SegmentPlan {
    pub fn sample_count(&self) -> usize {
        self.end_sample - self.start_sample
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_sample..self.end_sample
    }
}

/// Partition `samples` into segments of at least `target_ms` each.
///
/// Durations accumulate from the start of the current segment. A segment is
/// closed after the sample whose inclusion brings it strictly past the
/// target, so every segment but the last lasts at least `target_ms`. The
/// remainder after the last boundary is kept as a final, possibly shorter,
/// segment.
pub fn plan_segments(samples: &[Sample], timescale: u32, target_ms: u64) -> Vec<SegmentPlan> {
    let threshold = target_ms as u128 * timescale as u128;
    let mut plans = Vec::new();
    let mut start = 0;
    let mut acc: u64 = 0;

    for (i, sample) in samples.iter().enumerate() {
        acc += sample.duration as u64;
        if acc as u128 * 1000 > threshold {
            plans.push(SegmentPlan {
                start_sample: start,
                end_sample: i + 1,
                start_time: samples[start].start_decode_time,
                duration: acc,
            });
            start = i + 1;
            acc = 0;
        }
    }

    if start < samples.len() {
        plans.push(SegmentPlan {
            start_sample: start,
            end_sample: samples.len(),
            start_time: samples[start].start_decode_time,
            duration: acc,
        });
    }
    plans
}
