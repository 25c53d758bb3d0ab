//! Init-segment records: ftyp, mvhd/tkhd/mdhd, hdlr, trex.

use super::{check_version, write_box, BoxType, TimeField, HEADER_SIZE};
use crate::codec::{put_version_flags, ByteReader};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// File type box (also the layout of `styp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ftyp {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

impl Ftyp {
    /// Parse from box content (after the 8-byte header).
    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        let major_brand = r.fourcc()?;
        let minor_version = r.u32()?;
        let mut compatible_brands = Vec::with_capacity(r.remaining() / 4);
        while r.remaining() >= 4 {
            compatible_brands.push(r.fourcc()?);
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }

    pub fn to_bytes(&self, box_type: BoxType) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(8 + 4 * self.compatible_brands.len());
        content.put_slice(&self.major_brand);
        content.put_u32(self.minor_version);
        for brand in &self.compatible_brands {
            content.put_slice(brand);
        }
        write_box(box_type, &content)
    }
}

/// Which of the three version-dependent header boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `mvhd`
    Movie,
    /// `tkhd`
    Track,
    /// `mdhd`
    Media,
}

/// Byte offsets inside the box content for one header version.
struct Layout {
    timescale: Option<usize>,
    track_id: Option<usize>,
    duration: usize,
}

impl HeaderKind {
    pub fn box_type(self) -> BoxType {
        match self {
            Self::Movie => BoxType::MVHD,
            Self::Track => BoxType::TKHD,
            Self::Media => BoxType::MDHD,
        }
    }

    pub fn from_box_type(box_type: BoxType) -> Option<Self> {
        match box_type {
            BoxType::MVHD => Some(Self::Movie),
            BoxType::TKHD => Some(Self::Track),
            BoxType::MDHD => Some(Self::Media),
            _ => None,
        }
    }

    fn layout(self, version: u8) -> Layout {
        // Version 1 widens creation/modification time to 64 bits, which
        // moves every later field by 8 bytes.
        let wide = if version == 1 { 8 } else { 0 };
        match self {
            Self::Movie | Self::Media => Layout {
                timescale: Some(12 + wide),
                track_id: None,
                duration: 16 + wide,
            },
            Self::Track => Layout {
                timescale: None,
                track_id: Some(12 + wide),
                duration: 20 + wide,
            },
        }
    }
}

/// The timing fields of an mvhd, tkhd or mdhd box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    pub kind: HeaderKind,
    /// mvhd and mdhd only.
    pub timescale: Option<u32>,
    /// tkhd only.
    pub track_id: Option<u32>,
    pub duration: TimeField,
}

impl MediaHeader {
    /// Parse from box content (after the 8-byte header).
    pub fn parse(kind: HeaderKind, payload: &[u8], offset: usize) -> Result<Self> {
        let base = offset + HEADER_SIZE;
        let version = payload
            .first()
            .copied()
            .ok_or_else(|| Error::malformed(base, format!("empty {}", kind.box_type())))?;
        check_version(kind.box_type(), version, 1, offset)?;
        let layout = kind.layout(version);

        let field_u32 = |at: usize| -> Result<u32> {
            let mut r = ByteReader::new(payload, base);
            r.skip(at)?;
            r.u32()
        };

        let timescale = layout.timescale.map(field_u32).transpose()?;
        let track_id = layout.track_id.map(field_u32).transpose()?;
        let mut r = ByteReader::new(payload, base);
        r.skip(layout.duration)?;
        let duration = TimeField::read(&mut r, version)?;

        Ok(Self {
            kind,
            timescale,
            track_id,
            duration,
        })
    }

    /// Copy of the whole box `data` with the duration replaced.
    ///
    /// The new duration must have the box's own version layout, so the box
    /// length never changes.
    pub fn with_duration(data: &[u8], kind: HeaderKind, duration: TimeField, offset: usize) -> Result<Vec<u8>> {
        let payload = data.get(HEADER_SIZE..).unwrap_or_default();
        let current = Self::parse(kind, payload, offset)?;
        if current.duration.version() != duration.version() {
            return Err(Error::unsupported(format!(
                "{} duration of version {} into version {} box",
                kind.box_type(),
                duration.version(),
                current.duration.version()
            )));
        }
        let at = HEADER_SIZE + kind.layout(duration.version()).duration;
        let mut field = Vec::with_capacity(8);
        duration.put(&mut field);

        let mut out = data.to_vec();
        out[at..at + field.len()].copy_from_slice(&field);
        Ok(out)
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum HandlerType {
    Video,
    Audio,
    Text,
    Subtitle,
    Meta,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"text" => Self::Text,
            b"subt" => Self::Subtitle,
            b"meta" => Self::Meta,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Audio => *b"soun",
            Self::Text => *b"text",
            Self::Subtitle => *b"subt",
            Self::Meta => *b"meta",
            Self::Unknown(b) => *b,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

impl std::fmt::Display for HandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.as_bytes();
        write!(f, "{}", std::str::from_utf8(&bytes).unwrap_or("????"))
    }
}

/// Handler reference box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hdlr {
    pub handler_type: HandlerType,
}

impl Hdlr {
    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        r.version_flags()?;
        r.skip(4)?; // pre_defined
        Ok(Self {
            handler_type: HandlerType::from_bytes(r.fourcc()?),
        })
    }
}

/// Track extends box: fragment-wide sample defaults for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trex {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Trex {
    pub fn parse(payload: &[u8], offset: usize) -> Result<Self> {
        let mut r = ByteReader::new(payload, offset + HEADER_SIZE);
        r.version_flags()?;
        Ok(Self {
            track_id: r.u32()?,
            default_sample_description_index: r.u32()?,
            default_sample_duration: r.u32()?,
            default_sample_size: r.u32()?,
            default_sample_flags: r.u32()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(24);
        put_version_flags(&mut content, 0, 0);
        content.put_u32(self.track_id);
        content.put_u32(self.default_sample_description_index);
        content.put_u32(self.default_sample_duration);
        content.put_u32(self.default_sample_size);
        content.put_u32(self.default_sample_flags);
        write_box(BoxType::TREX, &content)
    }
}
