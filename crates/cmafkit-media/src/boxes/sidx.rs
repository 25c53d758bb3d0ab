//! Segment index box.

use super::{check_version, write_box, BoxType, COMPACT_TIME_LIMIT, HEADER_SIZE};
use crate::codec::{put_version_flags, ByteReader};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Version-dependent sidx timing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidxTiming {
    V0 {
        earliest_presentation_time: u32,
        first_offset: u32,
    },
    V1 {
        earliest_presentation_time: u64,
        first_offset: u64,
    },
}

impl SidxTiming {
    /// Version 0 unless the time reaches [`COMPACT_TIME_LIMIT`] or the offset
    /// needs more than 32 bits.
    pub fn for_values(earliest_presentation_time: u64, first_offset: u64) -> Self {
        match (
            earliest_presentation_time < COMPACT_TIME_LIMIT,
            u32::try_from(first_offset),
        ) {
            (true, Ok(first_offset)) => Self::V0 {
                earliest_presentation_time: earliest_presentation_time as u32,
                first_offset,
            },
            _ => Self::V1 {
                earliest_presentation_time,
                first_offset,
            },
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            Self::V0 { .. } => 0,
            Self::V1 { .. } => 1,
        }
    }

    pub fn earliest_presentation_time(&self) -> u64 {
        match *self {
            Self::V0 {
                earliest_presentation_time,
                ..
            } => earliest_presentation_time as u64,
            Self::V1 {
                earliest_presentation_time,
                ..
            } => earliest_presentation_time,
        }
    }

    pub fn first_offset(&self) -> u64 {
        match *self {
            Self::V0 { first_offset, .. } => first_offset as u64,
            Self::V1 { first_offset, .. } => first_offset,
        }
    }
}

/// One sidx reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidxReference {
    /// 0: media, 1: another sidx.
    pub reference_type: u8,
    /// 31 bits on the wire.
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    /// 3 bits on the wire.
    pub sap_type: u8,
    /// 28 bits on the wire.
    pub sap_delta_time: u32,
}

impl SidxReference {
    /// A media reference starting with a type 1 SAP.
    pub fn media(referenced_size: u32, subsegment_duration: u32) -> Self {
        Self {
            reference_type: 0,
            referenced_size,
            subsegment_duration,
            starts_with_sap: true,
            sap_type: 1,
            sap_delta_time: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidx {
    pub reference_id: u32,
    pub timescale: u32,
    pub timing: SidxTiming,
    pub references: Vec<SidxReference>,
}

const MAX_REFERENCED_SIZE: u32 = 0x7FFF_FFFF;
const MAX_SAP_DELTA: u32 = 0x0FFF_FFFF;

impl Sidx {
    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        let (version, _) = r.version_flags()?;
        check_version(BoxType::SIDX, version, 1, offset)?;
        let reference_id = r.u32()?;
        let timescale = r.u32()?;
        let timing = if version == 0 {
            SidxTiming::V0 {
                earliest_presentation_time: r.u32()?,
                first_offset: r.u32()?,
            }
        } else {
            SidxTiming::V1 {
                earliest_presentation_time: r.u64()?,
                first_offset: r.u64()?,
            }
        };
        r.skip(2)?; // reserved
        let count = r.u16()? as usize;

        let mut references = Vec::with_capacity(count.min(r.remaining() / 12));
        for _ in 0..count {
            let size_word = r.u32()?;
            let subsegment_duration = r.u32()?;
            let sap_word = r.u32()?;
            references.push(SidxReference {
                reference_type: (size_word >> 31) as u8,
                referenced_size: size_word & MAX_REFERENCED_SIZE,
                subsegment_duration,
                starts_with_sap: sap_word >> 31 == 1,
                sap_type: ((sap_word >> 28) & 0x7) as u8,
                sap_delta_time: sap_word & MAX_SAP_DELTA,
            });
        }

        Ok(Self {
            reference_id,
            timescale,
            timing,
            references,
        })
    }

    pub fn encoded_len(&self) -> usize {
        let timing = match self.timing {
            SidxTiming::V0 { .. } => 8,
            SidxTiming::V1 { .. } => 16,
        };
        HEADER_SIZE + 4 + 8 + timing + 4 + 12 * self.references.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let count = u16::try_from(self.references.len())
            .map_err(|_| Error::unsupported(format!("{} sidx references", self.references.len())))?;

        let mut content = BytesMut::with_capacity(self.encoded_len() - HEADER_SIZE);
        put_version_flags(&mut content, self.timing.version(), 0);
        content.put_u32(self.reference_id);
        content.put_u32(self.timescale);
        match self.timing {
            SidxTiming::V0 {
                earliest_presentation_time,
                first_offset,
            } => {
                content.put_u32(earliest_presentation_time);
                content.put_u32(first_offset);
            }
            SidxTiming::V1 {
                earliest_presentation_time,
                first_offset,
            } => {
                content.put_u64(earliest_presentation_time);
                content.put_u64(first_offset);
            }
        }
        content.put_u16(0);
        content.put_u16(count);

        for (i, r) in self.references.iter().enumerate() {
            if r.referenced_size > MAX_REFERENCED_SIZE {
                return Err(Error::unsupported(format!(
                    "sidx reference {} size {} exceeds 31 bits",
                    i, r.referenced_size
                )));
            }
            if r.sap_delta_time > MAX_SAP_DELTA || r.sap_type > 7 || r.reference_type > 1 {
                return Err(Error::unsupported(format!(
                    "sidx reference {} has out-of-range SAP or type fields",
                    i
                )));
            }
            content.put_u32(((r.reference_type as u32) << 31) | r.referenced_size);
            content.put_u32(r.subsegment_duration);
            content.put_u32(
                ((r.starts_with_sap as u32) << 31) | ((r.sap_type as u32) << 28) | r.sap_delta_time,
            );
        }
        Ok(write_box(BoxType::SIDX, &content))
    }
}
