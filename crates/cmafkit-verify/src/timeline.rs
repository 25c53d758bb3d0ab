//! Segment timelines derived from a track's fragments and from its index.

use cmafkit_media::{IndexModel, TrackModel};

/// Size and duration of one segment in some timescale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTiming {
    pub offset: u64,
    pub size: u64,
    pub start: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    pub timescale: u32,
    pub first_decode_time: u64,
    pub first_presentation_time: i128,
    pub segments: Vec<SegmentTiming>,
}

impl Timeline {
    /// One segment per fragment, sized from its `styp`/`moof` to the end
    /// of its `mdat`.
    pub fn from_fragments(model: &TrackModel) -> Self {
        let segments = model
            .fragments
            .iter()
            .map(|f| SegmentTiming {
                offset: f.byte_range.start,
                size: f.byte_size(),
                start: f.base_decode_time,
                duration: f.duration,
            })
            .collect();
        let first_decode_time = model.fragments.first().map_or(0, |f| f.base_decode_time);

        Self {
            timescale: model.timescale(),
            first_decode_time,
            first_presentation_time: model
                .first_presentation_time()
                .unwrap_or(first_decode_time as i128),
            segments,
        }
    }

    /// One segment per index reference, in the index's timescale.
    pub fn from_index(index: &IndexModel) -> Self {
        let mut start = index.earliest_presentation_time;
        let segments = index
            .segments
            .iter()
            .map(|s| {
                let seg = SegmentTiming {
                    offset: s.offset,
                    size: s.referenced_size as u64,
                    start,
                    duration: s.subsegment_duration as u64,
                };
                start = start.saturating_add(s.subsegment_duration as u64);
                seg
            })
            .collect();

        Self {
            timescale: index.timescale,
            first_decode_time: index.earliest_presentation_time,
            first_presentation_time: index.earliest_presentation_time as i128,
            segments,
        }
    }

    pub fn durations(&self) -> Vec<u64> {
        self.segments.iter().map(|s| s.duration).collect()
    }

    /// Segment durations in seconds.
    pub fn durations_secs(&self) -> Vec<f64> {
        let scale = self.timescale.max(1) as f64;
        self.segments.iter().map(|s| s.duration as f64 / scale).collect()
    }

    /// Fragment boundaries where the next segment does not start where the
    /// previous one ended: `(index of later segment, expected, found)`.
    pub fn gaps(&self) -> Vec<(usize, u64, u64)> {
        self.segments
            .windows(2)
            .enumerate()
            .map(|(i, w)| (i + 1, w[0].start.saturating_add(w[0].duration), w[1].start))
            .filter(|&(_, expected, found)| expected != found)
            .collect()
    }
}
