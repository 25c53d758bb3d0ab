//! Conformance checks. Each check is a pure function of timelines that
//! returns the categories it found, so callers fold them with `|`.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::timeline::Timeline;
use crate::Badness;

/// Allowed differences between adaptation sets, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub total_duration: f64,
    pub segment_duration: f64,
    pub average_duration: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            total_duration: 0.3,
            segment_duration: 0.05,
            average_duration: 0.05,
        }
    }
}

/// `a / a_scale == b / b_scale`, without rounding.
fn same_time(a: i128, a_scale: u32, b: i128, b_scale: u32) -> bool {
    a * b_scale as i128 == b * a_scale as i128
}

/// Compare the index against the fragments: segment count, scaled
/// durations and sizes. Returns `true` when they agree.
pub fn index_matches_fragments(name: &str, fragments: &Timeline, index: &Timeline) -> bool {
    if fragments.segments.len() != index.segments.len() {
        error!(
            "{}: sidx has {} segments, while there are {}",
            name,
            index.segments.len(),
            fragments.segments.len()
        );
        return false;
    }

    let mut equal = true;
    let mut diffs: BTreeMap<i128, usize> = BTreeMap::new();
    for (i, (seg, idx)) in fragments.segments.iter().zip(&index.segments).enumerate() {
        let seg_dur = seg.duration as i128;
        let idx_dur = idx.duration as i128;
        if !same_time(idx_dur, index.timescale, seg_dur, fragments.timescale) {
            debug!(
                "sidx duration mismatch for segment {}: ({}, {}) != ({}, {})",
                i + 1,
                idx_dur,
                index.timescale,
                seg_dur,
                fragments.timescale
            );
            let diff = idx_dur * fragments.timescale as i128 - seg_dur * index.timescale as i128;
            *diffs.entry(diff).or_default() += 1;
            equal = false;
        }
        if seg.size != idx.size {
            debug!(
                "sidx size mismatch for segment {}: {} != {}",
                i + 1,
                idx.size,
                seg.size
            );
            equal = false;
        }
    }
    if !diffs.is_empty() {
        info!("{}: sidx-segment duration diffs: {:?}", name, diffs);
    }
    equal
}

/// All per-track checks: decode timeline continuity, zero first decode
/// time, and agreement with the segment index.
pub fn check_track(name: &str, fragments: &Timeline, index: Option<&Timeline>) -> Badness {
    let mut badness = Badness::empty();

    for (i, expected, found) in fragments.gaps() {
        error!(
            "{}: fragment {} tfdt {} does not continue previous fragment ending at {}",
            name,
            i + 1,
            found,
            expected
        );
        badness |= Badness::NON_CONSISTENT_TFDT_TIMELINE;
    }

    if fragments.first_decode_time != 0 {
        error!(
            "{}: first tfdt decode time is not zero but {}",
            name, fragments.first_decode_time
        );
        badness |= Badness::NONZERO_FIRST_TIME;
    }

    let Some(index) = index else {
        error!("{}: no sidx", name);
        return badness | Badness::SIDX;
    };

    let index_start = index.first_presentation_time;
    let matches_decode = same_time(
        index_start,
        index.timescale,
        fragments.first_decode_time as i128,
        fragments.timescale,
    );
    let matches_presentation = same_time(
        index_start,
        index.timescale,
        fragments.first_presentation_time,
        fragments.timescale,
    );
    if !matches_decode && !matches_presentation {
        error!(
            "{}: sidx earliest presentation time {} agrees with neither decode time {} nor presentation time {}",
            name, index.first_presentation_time, fragments.first_decode_time, fragments.first_presentation_time
        );
        badness |= Badness::SIDX;
    }

    if !index_matches_fragments(name, fragments, index) {
        error!("{}: sidx/segment mismatch", name);
        badness |= Badness::SIDX;
    }

    badness
}

/// Number of misaligned representations in one adaptation set, given each
/// representation's name and segment durations.
///
/// With two representations any difference makes one bad. With more, a
/// representation is bad when it differs from more than one sibling.
pub fn count_misaligned(tracks: &[(String, Vec<u64>)]) -> usize {
    if tracks.len() < 2 {
        return 0;
    }

    let mut mismatches = vec![0usize; tracks.len()];
    for i in 0..tracks.len() - 1 {
        for j in i + 1..tracks.len() {
            let (name1, durs1) = &tracks[i];
            let (name2, durs2) = &tracks[j];
            if durs1 == durs2 {
                continue;
            }
            for (n, (d1, d2)) in durs1.iter().zip(durs2).enumerate() {
                if d1 != d2 {
                    debug!("segment {} duration differs between {} and {}: {} != {}", n + 1, name1, name2, d1, d2);
                }
            }
            if durs1.len() != durs2.len() {
                info!(
                    "{} has {} segments, {} has {}",
                    name1,
                    durs1.len(),
                    name2,
                    durs2.len()
                );
            }
            mismatches[i] += 1;
            mismatches[j] += 1;
        }
    }

    if tracks.len() == 2 {
        return usize::from(mismatches[0] > 0);
    }
    mismatches
        .iter()
        .zip(tracks)
        .filter(|(count, (name, _))| {
            if **count > 1 {
                error!("track {} is not aligned with {} other tracks", name, count);
            }
            **count > 1
        })
        .count()
}

fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compare adaptation sets pairwise by their segment durations in seconds.
/// Findings are logged as warnings; returns how many there were.
pub fn inter_set_warnings(sets: &[(String, Vec<f64>)], tolerances: &Tolerances) -> usize {
    let mut warnings = 0;
    for i in 0..sets.len().saturating_sub(1) {
        for j in i + 1..sets.len() {
            let (name1, durs1) = &sets[i];
            let (name2, durs2) = &sets[j];

            if durs1.len() != durs2.len() {
                warn!(
                    "number of segments differs for {} vs {}: {} vs {}",
                    name1,
                    name2,
                    durs1.len(),
                    durs2.len()
                );
                warnings += 1;
            }

            // The last segment is usually short; leave it out of the average.
            let common = durs1.len().min(durs2.len()).saturating_sub(1);
            if common > 0 {
                let diff = (average(&durs1[..common]) - average(&durs2[..common])).abs();
                if diff > tolerances.average_duration {
                    warn!("average segment duration for {} differs from {} by {:.2}s", name1, name2, diff);
                    warnings += 1;
                }
            }

            let total1: f64 = durs1.iter().sum();
            let total2: f64 = durs2.iter().sum();
            if (total1 - total2).abs() > tolerances.total_duration {
                warn!("total duration differs for {} vs {}: {:.1}s vs {:.1}s", name1, name2, total1, total2);
                warnings += 1;
            }

            let differing = durs1
                .iter()
                .zip(durs2)
                .enumerate()
                .filter(|(n, (d1, d2))| {
                    let differs = (*d1 - *d2).abs() > tolerances.segment_duration;
                    if differs {
                        debug!("segment {} duration {} vs {}: {:.2}s vs {:.2}s", n + 1, name1, name2, d1, d2);
                    }
                    differs
                })
                .count();
            if differing > 0 {
                warn!("{} vs {}: {} segment durations differ", name1, name2, differing);
                warnings += 1;
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::SegmentTiming;

    fn timeline(timescale: u32, first: u64, durations: &[u64], sizes: &[u64]) -> Timeline {
        let mut start = first;
        let mut offset = 1000;
        let segments = durations
            .iter()
            .zip(sizes)
            .map(|(&duration, &size)| {
                let seg = SegmentTiming { offset, size, start, duration };
                start += duration;
                offset += size;
                seg
            })
            .collect();
        Timeline {
            timescale,
            first_decode_time: first,
            first_presentation_time: first as i128,
            segments,
        }
    }

    #[test]
    fn test_consistent_track_is_clean() {
        let frags = timeline(48000, 0, &[96256, 96256, 4096], &[500, 510, 40]);
        let index = frags.clone();
        assert_eq!(check_track("a", &frags, Some(&index)), Badness::empty());
    }

    #[test]
    fn test_index_in_other_timescale() {
        let frags = timeline(90000, 0, &[180000, 90000], &[10, 20]);
        let index = timeline(1000, 0, &[2000, 1000], &[10, 20]);
        assert_eq!(check_track("v", &frags, Some(&index)), Badness::empty());
    }

    #[test]
    fn test_missing_index() {
        let frags = timeline(48000, 0, &[1024], &[8]);
        assert_eq!(check_track("a", &frags, None), Badness::SIDX);
    }

    #[test]
    fn test_index_disagreements() {
        let frags = timeline(1000, 0, &[2000, 2000], &[10, 20]);

        let short = timeline(1000, 0, &[2000], &[10]);
        assert_eq!(check_track("a", &frags, Some(&short)), Badness::SIDX);

        let sizes = timeline(1000, 0, &[2000, 2000], &[10, 21]);
        assert!(!index_matches_fragments("a", &frags, &sizes));

        let late = timeline(1000, 40, &[2000, 2000], &[10, 20]);
        assert_eq!(check_track("a", &frags, Some(&late)), Badness::SIDX);
    }

    #[test]
    fn test_index_may_start_at_presentation_time() {
        let mut frags = timeline(1000, 0, &[2000], &[10]);
        frags.first_presentation_time = 80;
        let index = timeline(1000, 80, &[2000], &[10]);
        assert_eq!(check_track("v", &frags, Some(&index)), Badness::empty());
    }

    #[test]
    fn test_gap_and_nonzero_start() {
        let mut frags = timeline(48000, 1024, &[5136384, 2048], &[10, 10]);
        frags.segments[1].start += 16;
        let index = timeline(48000, 1024, &[5136384, 2048], &[10, 10]);
        let badness = check_track("a", &frags, Some(&index));
        assert_eq!(
            badness,
            Badness::NON_CONSISTENT_TFDT_TIMELINE | Badness::NONZERO_FIRST_TIME
        );
    }

    #[test]
    fn test_alignment_pairs() {
        let a = ("a".to_string(), vec![2000, 2000, 500]);
        let b = ("b".to_string(), vec![2000, 2000, 500]);
        let c = ("c".to_string(), vec![2000, 1999, 501]);

        assert_eq!(count_misaligned(&[a.clone()]), 0);
        assert_eq!(count_misaligned(&[a.clone(), b.clone()]), 0);
        assert_eq!(count_misaligned(&[a.clone(), c.clone()]), 1);
        // c differs from both a and b; a and b differ from one sibling each.
        assert_eq!(count_misaligned(&[a, b, c]), 1);
    }

    #[test]
    fn test_inter_set_warnings() {
        let tolerances = Tolerances::default();
        let video = ("video".to_string(), vec![2.0, 2.0, 2.0, 1.0]);
        let audio = ("audio".to_string(), vec![2.0, 2.0, 2.0, 1.02]);
        assert_eq!(inter_set_warnings(&[video.clone(), audio], &tolerances), 0);

        let drifting = ("audio".to_string(), vec![2.1, 2.1, 2.1]);
        // count, average, total (7.0 vs 6.3) and per-segment all differ
        assert_eq!(inter_set_warnings(&[video, drifting], &tolerances), 4);
    }
}
