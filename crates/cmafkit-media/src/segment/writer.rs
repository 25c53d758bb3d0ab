//! Serialize a segment plan as new fragments plus a segment index.

use tracing::{debug, info};

use super::plan::{plan_segments, SegmentPlan};
use crate::boxes::{
    write_box, write_container_box, BoxType, Mfhd, SampleFields, Sidx, SidxReference, SidxTiming,
    Tfdt, Tfhd, TimeField, Trun, TrunSample, HEADER_SIZE,
};
use crate::track::{IndexModel, Sample, TrackModel};
use crate::{Error, Result};

/// Settings for [`resegment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ResegmentOptions {
    /// Minimum duration of every segment but the last.
    pub target_ms: u64,
    /// Write a `sidx` in front of the segments.
    pub write_sidx: bool,
}

impl Default for ResegmentOptions {
    fn default() -> Self {
        Self {
            target_ms: 2000,
            write_sidx: true,
        }
    }
}

/// Inclusive byte range, as used by `SegmentBase@indexRange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexRange {
    pub start: u64,
    pub end: u64,
}

impl std::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Result of [`resegment`].
#[derive(Debug, Clone)]
pub struct ResegmentOutput {
    pub data: Vec<u8>,
    pub plans: Vec<SegmentPlan>,
    /// Location of the new `sidx`, if one was written.
    pub index_range: Option<IndexRange>,
    pub index: Option<IndexModel>,
}

/// Re-cut a fragmented track into segments of at least
/// `options.target_ms`.
///
/// The init part of the input is kept byte for byte. Sample data is copied,
/// never re-encoded. The output buffer is complete before this returns.
pub fn resegment(data: &[u8], options: &ResegmentOptions) -> Result<ResegmentOutput> {
    let model = TrackModel::extract(data)?;
    if let Some(index) = &model.index {
        index.check_profile()?;
    }
    if model.fragments.is_empty() || model.samples.is_empty() {
        return Err(Error::unsupported("track has no fragments"));
    }
    model.check_continuity()?;

    let plans = plan_segments(&model.samples, model.timescale(), options.target_ms);
    let styp = model.styp.clone().map(|r| &data[r]);

    let mut segments = Vec::with_capacity(data.len() - model.header_end);
    let mut references = Vec::with_capacity(plans.len());
    for (i, plan) in plans.iter().enumerate() {
        let start = segments.len();
        if let Some(styp) = styp {
            segments.extend_from_slice(styp);
        }
        write_segment(data, &model, plan, i as u32 + 1, &mut segments)?;

        let size = segments.len() - start;
        debug!(
            sequence_number = i + 1,
            samples = plan.sample_count(),
            start_time = plan.start_time,
            duration = plan.duration,
            size,
            "segment"
        );
        references.push(SidxReference::media(
            u32::try_from(size).map_err(|_| Error::unsupported(format!("segment {} is {} bytes", i + 1, size)))?,
            u32::try_from(plan.duration).map_err(|_| {
                Error::unsupported(format!("segment {} duration {} exceeds 32 bits", i + 1, plan.duration))
            })?,
        ));
    }

    let mut out = Vec::with_capacity(model.header_end + segments.len() + 64);
    out.extend_from_slice(&data[..model.header_end]);

    let (index_range, index) = if options.write_sidx {
        let sidx = Sidx {
            reference_id: model.track_id,
            timescale: model.timescale(),
            timing: SidxTiming::for_values(plans[0].start_time, 0),
            references,
        };
        let bytes = sidx.to_bytes()?;
        let range = IndexRange {
            start: out.len() as u64,
            end: (out.len() + bytes.len() - 1) as u64,
        };
        out.extend_from_slice(&bytes);
        (Some(range), Some(IndexModel::from_sidx(&sidx, out.len() as u64)?))
    } else {
        (None, None)
    };
    out.extend_from_slice(&segments);

    info!(
        samples = model.samples.len(),
        fragments_in = model.fragments.len(),
        segments_out = plans.len(),
        target_ms = options.target_ms,
        "resegmented track"
    );

    Ok(ResegmentOutput {
        data: out,
        plans,
        index_range,
        index,
    })
}

/// `Some(v)` if every sample maps to the same `v`.
fn uniform<T: PartialEq + Copy>(samples: &[Sample], field: impl Fn(&Sample) -> T) -> Option<T> {
    let first = field(samples.first()?);
    samples.iter().all(|s| field(s) == first).then_some(first)
}

/// Append `moof` + `mdat` for one plan.
fn write_segment(
    data: &[u8],
    model: &TrackModel,
    plan: &SegmentPlan,
    sequence_number: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let samples = &model.samples[plan.range()];

    let duration = uniform(samples, |s| s.duration);
    let size = uniform(samples, |s| s.size);
    let flags = uniform(samples, |s| s.flags);
    let zero_cto = samples.iter().all(|s| s.composition_time_offset == 0);

    let tfhd = Tfhd {
        track_id: model.track_id,
        default_sample_duration: duration,
        default_sample_size: size,
        default_sample_flags: flags,
        default_base_is_moof: true,
        ..Default::default()
    };
    let mut trun = Trun {
        version: 1,
        data_offset: Some(0),
        first_sample_flags: None,
        fields: SampleFields {
            duration: duration.is_none(),
            size: size.is_none(),
            flags: flags.is_none(),
            composition_time_offset: !zero_cto,
        },
        samples: samples
            .iter()
            .map(|s| TrunSample {
                duration: s.duration,
                size: s.size,
                flags: s.flags,
                composition_time_offset: s.composition_time_offset,
            })
            .collect(),
    };

    let mfhd = Mfhd { sequence_number }.to_bytes();
    let tfhd = tfhd.to_bytes();
    let tfdt = Tfdt(TimeField::for_value(plan.start_time)).to_bytes();
    let moof_len = 2 * HEADER_SIZE + mfhd.len() + tfhd.len() + tfdt.len() + trun.encoded_len();
    trun.data_offset = Some(
        i32::try_from(moof_len + HEADER_SIZE)
            .map_err(|_| Error::unsupported(format!("moof of {} bytes", moof_len)))?,
    );
    let trun = trun.to_bytes()?;
    let traf = write_container_box(BoxType::TRAF, &[&tfhd, &tfdt, &trun]);
    let moof = write_container_box(BoxType::MOOF, &[&mfhd, &traf]);
    debug_assert_eq!(moof.len(), moof_len);

    let payload_len: u64 = samples.iter().map(|s| s.size as u64).sum();
    if payload_len + HEADER_SIZE as u64 > u32::MAX as u64 {
        return Err(Error::unsupported(format!(
            "mdat of segment {} needs {} bytes",
            sequence_number, payload_len
        )));
    }
    let mut payload = Vec::with_capacity(payload_len as usize);
    for s in samples {
        // Extraction checked every sample range against the buffer.
        payload.extend_from_slice(&data[s.byte_range().start as usize..s.byte_range().end as usize]);
    }

    out.extend_from_slice(&moof);
    out.extend_from_slice(&write_box(BoxType::MDAT, &payload));
    Ok(())
}
