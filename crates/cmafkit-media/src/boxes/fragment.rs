//! Movie-fragment records: mfhd, tfhd, tfdt, trun.

use super::{check_version, write_box, BoxType, TimeField, HEADER_SIZE};
use crate::codec::{put_version_flags, ByteReader};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Movie fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mfhd {
    pub sequence_number: u32,
}

impl Mfhd {
    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        r.version_flags()?;
        Ok(Self {
            sequence_number: r.u32()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(8);
        put_version_flags(&mut content, 0, 0);
        content.put_u32(self.sequence_number);
        write_box(BoxType::MFHD, &content)
    }
}

/// Track fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tfhd {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,
}

impl Tfhd {
    pub const BASE_DATA_OFFSET: u32 = 0x00_0001;
    pub const SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
    pub const DEFAULT_DURATION: u32 = 0x00_0008;
    pub const DEFAULT_SIZE: u32 = 0x00_0010;
    pub const DEFAULT_FLAGS: u32 = 0x00_0020;
    pub const DURATION_IS_EMPTY: u32 = 0x01_0000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.base_data_offset.is_some() {
            flags |= Self::BASE_DATA_OFFSET;
        }
        if self.sample_description_index.is_some() {
            flags |= Self::SAMPLE_DESCRIPTION_INDEX;
        }
        if self.default_sample_duration.is_some() {
            flags |= Self::DEFAULT_DURATION;
        }
        if self.default_sample_size.is_some() {
            flags |= Self::DEFAULT_SIZE;
        }
        if self.default_sample_flags.is_some() {
            flags |= Self::DEFAULT_FLAGS;
        }
        if self.duration_is_empty {
            flags |= Self::DURATION_IS_EMPTY;
        }
        if self.default_base_is_moof {
            flags |= Self::DEFAULT_BASE_IS_MOOF;
        }
        flags
    }

    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        let (_, flags) = r.version_flags()?;
        let track_id = r.u32()?;

        let base_data_offset = (flags & Self::BASE_DATA_OFFSET != 0).then(|| r.u64()).transpose()?;
        let sample_description_index =
            (flags & Self::SAMPLE_DESCRIPTION_INDEX != 0).then(|| r.u32()).transpose()?;
        let default_sample_duration = (flags & Self::DEFAULT_DURATION != 0).then(|| r.u32()).transpose()?;
        let default_sample_size = (flags & Self::DEFAULT_SIZE != 0).then(|| r.u32()).transpose()?;
        let default_sample_flags = (flags & Self::DEFAULT_FLAGS != 0).then(|| r.u32()).transpose()?;

        Ok(Self {
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
            duration_is_empty: flags & Self::DURATION_IS_EMPTY != 0,
            default_base_is_moof: flags & Self::DEFAULT_BASE_IS_MOOF != 0,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(32);
        put_version_flags(&mut content, 0, self.flags());
        content.put_u32(self.track_id);
        if let Some(v) = self.base_data_offset {
            content.put_u64(v);
        }
        for v in [
            self.sample_description_index,
            self.default_sample_duration,
            self.default_sample_size,
            self.default_sample_flags,
        ]
        .into_iter()
        .flatten()
        {
            content.put_u32(v);
        }
        write_box(BoxType::TFHD, &content)
    }
}

/// Track fragment decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tfdt(pub TimeField);

impl Tfdt {
    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        let (version, _) = r.version_flags()?;
        check_version(BoxType::TFDT, version, 1, offset)?;
        Ok(Self(TimeField::read(&mut r, version)?))
    }

    pub fn base_media_decode_time(&self) -> u64 {
        self.0.value()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(12);
        put_version_flags(&mut content, self.0.version(), 0);
        self.0.put(&mut content);
        write_box(BoxType::TFDT, &content)
    }
}

/// Which per-sample columns a trun carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFields {
    pub duration: bool,
    pub size: bool,
    pub flags: bool,
    pub composition_time_offset: bool,
}

impl SampleFields {
    fn from_flags(flags: u32) -> Self {
        Self {
            duration: flags & Trun::SAMPLE_DURATION != 0,
            size: flags & Trun::SAMPLE_SIZE != 0,
            flags: flags & Trun::SAMPLE_FLAGS != 0,
            composition_time_offset: flags & Trun::SAMPLE_CTO != 0,
        }
    }

    fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.duration {
            bits |= Trun::SAMPLE_DURATION;
        }
        if self.size {
            bits |= Trun::SAMPLE_SIZE;
        }
        if self.flags {
            bits |= Trun::SAMPLE_FLAGS;
        }
        if self.composition_time_offset {
            bits |= Trun::SAMPLE_CTO;
        }
        bits
    }

    /// Bytes per sample entry.
    pub fn entry_len(&self) -> usize {
        4 * [self.duration, self.size, self.flags, self.composition_time_offset]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

/// One trun entry. Columns not listed in [`Trun::fields`] read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrunSample {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    pub composition_time_offset: i64,
}

/// Track fragment run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trun {
    /// 0: unsigned composition offsets, 1: signed.
    pub version: u8,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub fields: SampleFields,
    pub samples: Vec<TrunSample>,
}

impl Trun {
    pub const DATA_OFFSET: u32 = 0x000001;
    pub const FIRST_SAMPLE_FLAGS: u32 = 0x000004;
    pub const SAMPLE_DURATION: u32 = 0x000100;
    pub const SAMPLE_SIZE: u32 = 0x000200;
    pub const SAMPLE_FLAGS: u32 = 0x000400;
    pub const SAMPLE_CTO: u32 = 0x000800;

    pub fn flags(&self) -> u32 {
        let mut flags = self.fields.bits();
        if self.data_offset.is_some() {
            flags |= Self::DATA_OFFSET;
        }
        if self.first_sample_flags.is_some() {
            flags |= Self::FIRST_SAMPLE_FLAGS;
        }
        flags
    }

    /// Parse a trun payload. A run without per-sample columns takes no
    /// entry bytes, so its count is bounded by `max_samples` instead.
    pub fn parse(payload: &[u8], offset: usize, max_samples: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        let (version, flags) = r.version_flags()?;
        check_version(BoxType::TRUN, version, 1, offset)?;
        let sample_count = r.u32()? as usize;
        let data_offset = (flags & Self::DATA_OFFSET != 0).then(|| r.i32()).transpose()?;
        let first_sample_flags = (flags & Self::FIRST_SAMPLE_FLAGS != 0).then(|| r.u32()).transpose()?;
        let fields = SampleFields::from_flags(flags);

        // Guard the allocation against a corrupt count.
        let entry_len = fields.entry_len();
        if entry_len > 0 && r.remaining() / entry_len < sample_count {
            return Err(Error::malformed(
                offset,
                format!(
                    "trun declares {} samples but holds {} bytes of entries",
                    sample_count,
                    r.remaining()
                ),
            ));
        }
        if entry_len == 0 && sample_count > max_samples {
            return Err(Error::malformed(
                offset,
                format!(
                    "trun without sample fields declares {} samples, at most {} fit the file",
                    sample_count, max_samples
                ),
            ));
        }

        let mut samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            let mut s = TrunSample::default();
            if fields.duration {
                s.duration = r.u32()?;
            }
            if fields.size {
                s.size = r.u32()?;
            }
            if fields.flags {
                s.flags = r.u32()?;
            }
            if fields.composition_time_offset {
                s.composition_time_offset = if version == 0 {
                    r.u32()? as i64
                } else {
                    r.i32()? as i64
                };
            }
            samples.push(s);
        }

        Ok(Self {
            version,
            data_offset,
            first_sample_flags,
            fields,
            samples,
        })
    }

    /// Serialized box length.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + 8
            + 4 * self.data_offset.is_some() as usize
            + 4 * self.first_sample_flags.is_some() as usize
            + self.fields.entry_len() * self.samples.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let sample_count = u32::try_from(self.samples.len())
            .map_err(|_| Error::unsupported("more than 2^32 samples in one trun"))?;
        let mut content = BytesMut::with_capacity(self.encoded_len() - HEADER_SIZE);
        put_version_flags(&mut content, self.version, self.flags());
        content.put_u32(sample_count);
        if let Some(v) = self.data_offset {
            content.put_i32(v);
        }
        if let Some(v) = self.first_sample_flags {
            content.put_u32(v);
        }
        for s in &self.samples {
            if self.fields.duration {
                content.put_u32(s.duration);
            }
            if self.fields.size {
                content.put_u32(s.size);
            }
            if self.fields.flags {
                content.put_u32(s.flags);
            }
            if self.fields.composition_time_offset {
                let cto = s.composition_time_offset;
                if self.version == 0 {
                    let v = u32::try_from(cto).map_err(|_| {
                        Error::unsupported(format!("composition offset {} in a version 0 trun", cto))
                    })?;
                    content.put_u32(v);
                } else {
                    let v = i32::try_from(cto).map_err(|_| {
                        Error::unsupported(format!("composition offset {} exceeds 32 bits", cto))
                    })?;
                    content.put_i32(v);
                }
            }
        }
        Ok(write_box(BoxType::TRUN, &content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tfhd_optional_fields_in_flag_order() {
        let tfhd = Tfhd {
            track_id: 2,
            base_data_offset: Some(0x1_0000_0000),
            default_sample_duration: Some(1024),
            default_sample_flags: Some(0x0200_0000),
            ..Default::default()
        };
        let bytes = tfhd.to_bytes();
        assert_eq!(bytes.len(), 8 + 4 + 4 + 8 + 4 + 4);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0x29]);
        assert_eq!(Tfhd::parse(&bytes[8..], 0).unwrap(), tfhd);
    }

    #[test]
    fn test_tfhd_base_is_moof_flag() {
        let tfhd = Tfhd {
            track_id: 1,
            default_base_is_moof: true,
            ..Default::default()
        };
        assert_eq!(tfhd.flags(), 0x02_0000);
        assert_eq!(tfhd.to_bytes().len(), 16);
    }

    #[test]
    fn test_tfdt_versions() {
        let v0 = Tfdt(TimeField::V0(5136384)).to_bytes();
        assert_eq!(v0.len(), 16);
        assert_eq!(Tfdt::parse(&v0[8..], 0).unwrap().base_media_decode_time(), 5136384);

        let v1 = Tfdt(TimeField::V1(1 << 33)).to_bytes();
        assert_eq!(v1.len(), 20);
        assert_eq!(v1[8], 1);
        assert_eq!(Tfdt::parse(&v1[8..], 0).unwrap().0, TimeField::V1(1 << 33));
    }

    #[test]
    fn test_trun_signed_offsets() {
        let trun = Trun {
            version: 1,
            data_offset: Some(120),
            first_sample_flags: None,
            fields: SampleFields {
                size: true,
                composition_time_offset: true,
                ..Default::default()
            },
            samples: vec![
                TrunSample {
                    size: 10,
                    composition_time_offset: -512,
                    ..Default::default()
                },
                TrunSample {
                    size: 12,
                    composition_time_offset: 1024,
                    ..Default::default()
                },
            ],
        };
        let bytes = trun.to_bytes().unwrap();
        assert_eq!(bytes.len(), trun.encoded_len());
        assert_eq!(bytes.len(), 8 + 8 + 4 + 2 * 8);
        assert_eq!(Trun::parse(&bytes[8..], 0, 0).unwrap(), trun);
    }

    #[test]
    fn test_trun_unsigned_offsets_reject_negative() {
        let trun = Trun {
            version: 0,
            fields: SampleFields {
                composition_time_offset: true,
                ..Default::default()
            },
            samples: vec![TrunSample {
                composition_time_offset: -1,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(trun.to_bytes().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_trun_count_exceeding_payload() {
        let mut content = BytesMut::new();
        put_version_flags(&mut content, 0, Trun::SAMPLE_SIZE);
        content.put_u32(1000);
        content.put_u32(5);
        let bytes = write_box(BoxType::TRUN, &content);
        assert!(Trun::parse(&bytes[8..], 0, usize::MAX).unwrap_err().is_malformed());
    }

    #[test]
    fn test_trun_without_columns_keeps_count() {
        let mut content = BytesMut::new();
        put_version_flags(&mut content, 0, Trun::DATA_OFFSET);
        content.put_u32(3);
        content.put_i32(100);
        let bytes = write_box(BoxType::TRUN, &content);
        let trun = Trun::parse(&bytes[8..], 0, 3).unwrap();
        assert_eq!(trun.samples.len(), 3);
        assert_eq!(trun.data_offset, Some(100));
    }

    #[test]
    fn test_trun_without_columns_count_is_bounded() {
        let mut content = BytesMut::new();
        put_version_flags(&mut content, 0, Trun::DATA_OFFSET);
        content.put_u32(u32::MAX);
        content.put_i32(100);
        let bytes = write_box(BoxType::TRUN, &content);
        let err = Trun::parse(&bytes[8..], 0, 4096).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("4294967295"));
    }

    #[test]
    fn test_mfhd_round_trip() {
        let bytes = Mfhd { sequence_number: 7 }.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Mfhd::parse(&bytes[8..], 0).unwrap().sequence_number, 7);
    }
}
