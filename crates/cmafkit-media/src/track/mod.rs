//! Sample-accurate model of a fragmented track.
//!
//! [`TrackModel::extract`] walks one CMAF track file (init part, optional
//! `sidx`, then `styp`/`moof`/`mdat` fragments) and produces the ordered
//! sample timeline with byte locations into the input buffer, one
//! [`Fragment`] per `moof`+`mdat` pair, and the existing segment index if the
//! file carries one.

mod extractor;

use std::ops::Range;

use crate::boxes::{find_path, BoxType, HandlerType, Hdlr, HeaderKind, MediaHeader, Sidx, SidxReference};
use crate::{Error, Result};

/// Sample flags of a sync sample (`sample_depends_on = 2`).
pub const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;

/// `sample_is_non_sync_sample` bit of the sample flags word.
pub const NON_SYNC_SAMPLE_BIT: u32 = 0x0001_0000;

/// Values a sample falls back to when its trun entry omits a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackDefaults {
    pub timescale: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
    pub default_cto: i64,
}

/// One decodable unit of the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub start_decode_time: u64,
    pub duration: u32,
    pub size: u32,
    /// Absolute position of the sample data in the track file.
    pub byte_offset: u64,
    pub flags: u32,
    pub composition_time_offset: i64,
}

impl Sample {
    /// Saturates; extracted samples never overflow.
    pub fn end_decode_time(&self) -> u64 {
        self.start_decode_time.saturating_add(self.duration as u64)
    }

    /// Widened so any decode time and offset pair is exact.
    pub fn presentation_time(&self) -> i128 {
        self.start_decode_time as i128 + self.composition_time_offset as i128
    }

    pub fn byte_range(&self) -> Range<u64> {
        self.byte_offset..self.byte_offset.saturating_add(self.size as u64)
    }

    pub fn is_sync(&self) -> bool {
        self.flags & NON_SYNC_SAMPLE_BIT == 0
    }
}

/// One `moof` + `mdat` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Fragment {
    pub sequence_number: u32,
    pub base_decode_time: u64,
    /// Indices into [`TrackModel::samples`].
    pub sample_range: Range<usize>,
    /// From the first byte of the `styp` (or the `moof` if there is none) to
    /// the last byte of the `mdat`.
    pub byte_range: Range<u64>,
    /// Sum of sample durations.
    pub duration: u64,
}

impl Fragment {
    pub fn end_decode_time(&self) -> u64 {
        self.base_decode_time.saturating_add(self.duration)
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_range.end - self.byte_range.start
    }
}

/// One subsegment of an [`IndexModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexSegment {
    /// Absolute file offset of the referenced bytes.
    pub offset: u64,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub reference_type: u8,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

/// Segment index of a track, parsed from or destined for a `sidx` box.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexModel {
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub segments: Vec<IndexSegment>,
}

impl IndexModel {
    /// Resolve a parsed `sidx`. Offsets count from `anchor`, the first byte
    /// after the sidx box. Fails if the referenced bytes or the indexed
    /// time span run past 64 bits.
    pub fn from_sidx(sidx: &Sidx, anchor: u64) -> Result<Self> {
        let overflow = |what: &str| Error::malformed(anchor as usize, format!("sidx {} overflows 64 bits", what));

        let earliest_presentation_time = sidx.timing.earliest_presentation_time();
        let mut end_time = earliest_presentation_time;
        let mut offset = anchor
            .checked_add(sidx.timing.first_offset())
            .ok_or_else(|| overflow("first offset"))?;

        let mut segments = Vec::with_capacity(sidx.references.len());
        for r in &sidx.references {
            segments.push(IndexSegment {
                offset,
                referenced_size: r.referenced_size,
                subsegment_duration: r.subsegment_duration,
                reference_type: r.reference_type,
                starts_with_sap: r.starts_with_sap,
                sap_type: r.sap_type,
                sap_delta_time: r.sap_delta_time,
            });
            offset = offset
                .checked_add(r.referenced_size as u64)
                .ok_or_else(|| overflow("referenced size"))?;
            end_time = end_time
                .checked_add(r.subsegment_duration as u64)
                .ok_or_else(|| overflow("duration"))?;
        }

        Ok(Self {
            reference_id: sidx.reference_id,
            timescale: sidx.timescale,
            earliest_presentation_time,
            first_offset: sidx.timing.first_offset(),
            segments,
        })
    }

    /// References in wire form.
    pub fn references(&self) -> Vec<SidxReference> {
        self.segments
            .iter()
            .map(|s| SidxReference {
                reference_type: s.reference_type,
                referenced_size: s.referenced_size,
                subsegment_duration: s.subsegment_duration,
                starts_with_sap: s.starts_with_sap,
                sap_type: s.sap_type,
                sap_delta_time: s.sap_delta_time,
            })
            .collect()
    }

    /// Accept only the DASH-OnDemand profile: zero first offset, media
    /// references, each starting with a type 1 SAP at zero delta.
    pub fn check_profile(&self) -> Result<()> {
        if self.first_offset != 0 {
            return Err(Error::unsupported(format!(
                "sidx first_offset {} (only 0 is supported)",
                self.first_offset
            )));
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.reference_type != 0 {
                return Err(Error::unsupported(format!(
                    "sidx reference {} points to another index",
                    i
                )));
            }
            if !seg.starts_with_sap || seg.sap_type != 1 {
                return Err(Error::unsupported(format!(
                    "sidx reference {} has SAP type {} (only 1 is supported)",
                    i,
                    if seg.starts_with_sap { seg.sap_type } else { 0 }
                )));
            }
            if seg.sap_delta_time != 0 {
                return Err(Error::unsupported(format!(
                    "sidx reference {} has SAP delta time {}",
                    i, seg.sap_delta_time
                )));
            }
        }
        Ok(())
    }

    pub fn total_duration(&self) -> u64 {
        self.segments.iter().map(|s| s.subsegment_duration as u64).sum()
    }
}

/// Everything [`TrackModel::extract`] learns about one track file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackModel {
    /// From `tkhd`, or the first `tfhd` if the file has no `tkhd`.
    pub track_id: u32,
    pub handler_type: Option<HandlerType>,
    /// Track-level defaults (`mdhd` timescale, `trex` values).
    pub defaults: TrackDefaults,
    pub samples: Vec<Sample>,
    pub fragments: Vec<Fragment>,
    pub index: Option<IndexModel>,
    /// Byte range of the first `styp`.
    pub styp: Option<Range<usize>>,
    /// Length of the leading init part, before any `sidx`, `styp` or `moof`.
    pub header_end: usize,
}

impl TrackModel {
    /// Build the model of a single-track fragmented file.
    pub fn extract(data: &[u8]) -> Result<Self> {
        extractor::extract(data)
    }

    pub fn timescale(&self) -> u32 {
        self.defaults.timescale
    }

    /// Sum of all sample durations.
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// Presentation time of the first sample.
    pub fn first_presentation_time(&self) -> Option<i128> {
        self.samples.first().map(Sample::presentation_time)
    }

    /// Fragment boundaries where the next `tfdt` does not continue the
    /// previous fragment: `(index of later fragment, expected, found)`.
    pub fn timeline_gaps(&self) -> Vec<(usize, u64, u64)> {
        self.fragments
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0].end_decode_time() != w[1].base_decode_time)
            .map(|(i, w)| (i + 1, w[0].end_decode_time(), w[1].base_decode_time))
            .collect()
    }

    /// Fail unless the decode timeline is continuous across fragments.
    pub fn check_continuity(&self) -> Result<()> {
        match self.timeline_gaps().first() {
            None => Ok(()),
            Some(&(i, expected, found)) => Err(Error::unsupported(format!(
                "decode timeline gap before fragment {}: expected tfdt {}, found {}",
                i, expected, found
            ))),
        }
    }
}

/// Summary of an init segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct InitInfo {
    pub timescale: u32,
    pub handler_type: HandlerType,
}

/// Read the media timescale and handler of the first track in `data`.
pub fn init_info(data: &[u8]) -> Result<InitInfo> {
    let mdia = [BoxType::MOOV, BoxType::TRAK, BoxType::MDIA];

    let mdhd = find_path(data, &[mdia[0], mdia[1], mdia[2], BoxType::MDHD])?
        .ok_or(Error::MissingBox("mdhd"))?;
    let header = MediaHeader::parse(HeaderKind::Media, &data[mdhd.payload_range()], mdhd.offset)?;

    let hdlr = find_path(data, &[mdia[0], mdia[1], mdia[2], BoxType::HDLR])?
        .ok_or(Error::MissingBox("hdlr"))?;
    let hdlr = Hdlr::parse(&data[hdlr.payload_range()], hdlr.offset)?;

    Ok(InitInfo {
        timescale: header.timescale.unwrap_or_default(),
        handler_type: hdlr.handler_type,
    })
}
