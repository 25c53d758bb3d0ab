//! ISO BMFF box layer.
//!
//! Each box follows the standard layout: 4-byte size (big-endian u32),
//! 4-byte type (ASCII), then box-specific content. Boxes are never copied
//! while reading: a [`BoxHeader`] is an offset and a length into the
//! caller's buffer.

mod engine;
mod fragment;
mod init;
mod sidx;

pub use engine::{rewrite, walk, BoxFilter, Edit, PassThrough, Position};
pub use fragment::{Mfhd, SampleFields, Tfdt, Tfhd, Trun, TrunSample};
pub use init::{Ftyp, HandlerType, Hdlr, HeaderKind, MediaHeader, Trex};
pub use sidx::{Sidx, SidxReference, SidxTiming};

use crate::codec::ByteReader;
use crate::{Error, Result};
use bytes::BufMut;

/// Size of a compact box header (32-bit size + type).
pub const HEADER_SIZE: usize = 8;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const SIDX: Self = Self(*b"sidx");
    pub const MDAT: Self = Self(*b"mdat");
    pub const EMSG: Self = Self(*b"emsg");
    pub const FREE: Self = Self(*b"free");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Location of one box inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type code.
    pub box_type: BoxType,
    /// Offset of the first header byte.
    pub offset: usize,
    /// Box size including the header.
    pub size: usize,
}

impl BoxHeader {
    /// End offset (exclusive).
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Byte range of the whole box.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.end()
    }

    /// Byte range of the content after the 8-byte header.
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.offset + HEADER_SIZE..self.end()
    }
}

/// Read the box header at `pos`, which must lie within `[pos, end)`.
pub fn read_header(data: &[u8], pos: usize, end: usize) -> Result<BoxHeader> {
    if end > data.len() || pos > end || end - pos < HEADER_SIZE {
        return Err(Error::malformed(pos, "truncated box header"));
    }
    let size = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
    let box_type = BoxType([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);

    match size {
        1 => {
            return Err(Error::unsupported(format!(
                "64-bit box size for {} at offset {}",
                box_type, pos
            )))
        }
        0 => {
            return Err(Error::malformed(
                pos,
                format!("{} box with size 0 (to end of file)", box_type),
            ))
        }
        s if (s as usize) < HEADER_SIZE => {
            return Err(Error::malformed(
                pos,
                format!("{} box size {} is smaller than its header", box_type, s),
            ))
        }
        _ => {}
    }

    let size = size as usize;
    if size > end - pos {
        return Err(Error::malformed(
            pos,
            format!(
                "{} box of size {} overruns its parent ({} bytes left)",
                box_type,
                size,
                end - pos
            ),
        ));
    }

    Ok(BoxHeader {
        box_type,
        offset: pos,
        size,
    })
}

/// Parse the sequence of boxes filling `[start, end)`.
pub fn parse_boxes(data: &[u8], start: usize, end: usize) -> Result<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut pos = start;
    while pos < end {
        let header = read_header(data, pos, end)?;
        pos = header.end();
        boxes.push(header);
    }
    Ok(boxes)
}

/// Parse the top-level box list of a file.
pub fn parse_top_level(data: &[u8]) -> Result<Vec<BoxHeader>> {
    parse_boxes(data, 0, data.len())
}

/// Parse the children of a container box.
pub fn parse_children(data: &[u8], parent: &BoxHeader) -> Result<Vec<BoxHeader>> {
    parse_boxes(data, parent.offset + HEADER_SIZE, parent.end())
}

/// Find the first box along a chain of types, e.g. `[MOOV, TRAK, MDIA, MDHD]`.
pub fn find_path(data: &[u8], path: &[BoxType]) -> Result<Option<BoxHeader>> {
    let mut level = parse_top_level(data)?;
    let mut found = None;
    for (depth, box_type) in path.iter().enumerate() {
        let Some(header) = level.iter().find(|h| h.box_type == *box_type).copied() else {
            return Ok(None);
        };
        if depth + 1 < path.len() {
            level = parse_children(data, &header)?;
        }
        found = Some(header);
    }
    Ok(found)
}

/// Times below this limit are written in 32-bit fields.
///
/// The limit sits two bits below the field width so that offsets added
/// later (e.g. when shifting a timeline) still fit.
pub const COMPACT_TIME_LIMIT: u64 = 1 << 30;

/// A time or offset whose width follows the full-box version:
/// 32 bits in version 0, 64 bits in version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeField {
    V0(u32),
    V1(u64),
}

impl TimeField {
    /// Narrowest layout that keeps [`COMPACT_TIME_LIMIT`] headroom.
    pub fn for_value(value: u64) -> Self {
        if value < COMPACT_TIME_LIMIT {
            Self::V0(value as u32)
        } else {
            Self::V1(value)
        }
    }

    pub fn read(reader: &mut ByteReader<'_>, version: u8) -> Result<Self> {
        match version {
            0 => Ok(Self::V0(reader.u32()?)),
            _ => Ok(Self::V1(reader.u64()?)),
        }
    }

    pub fn put<B: BufMut>(self, buf: &mut B) {
        match self {
            Self::V0(v) => buf.put_u32(v),
            Self::V1(v) => buf.put_u64(v),
        }
    }

    pub fn value(self) -> u64 {
        match self {
            Self::V0(v) => v as u64,
            Self::V1(v) => v,
        }
    }

    pub fn version(self) -> u8 {
        match self {
            Self::V0(_) => 0,
            Self::V1(_) => 1,
        }
    }

    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::V0(_) => 4,
            Self::V1(_) => 8,
        }
    }

    /// `value` in the same layout, or `None` if it does not fit.
    pub fn with_value(self, value: u64) -> Option<Self> {
        match self {
            Self::V0(_) => u32::try_from(value).ok().map(Self::V0),
            Self::V1(_) => Some(Self::V1(value)),
        }
    }

    /// All-ones value of this layout ("unknown duration").
    pub fn saturated(self) -> Self {
        match self {
            Self::V0(_) => Self::V0(u32::MAX),
            Self::V1(_) => Self::V1(u64::MAX),
        }
    }
}

/// Reject full-box versions this crate has no layout for.
pub(crate) fn check_version(box_type: BoxType, version: u8, max: u8, offset: usize) -> Result<()> {
    if version > max {
        return Err(Error::unsupported(format!(
            "{} version {} at offset {}",
            box_type, version, offset
        )));
    }
    Ok(())
}

const MAX_DEPTH: usize = 8;

/// Ancestor chain of a box, outermost first (`moof` → `traf` → `trun`).
///
/// Fixed capacity so that dispatch on a path never allocates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoxPath {
    types: [BoxType; MAX_DEPTH],
    len: usize,
}

impl BoxPath {
    /// Path of a top-level box.
    pub fn top(box_type: BoxType) -> Self {
        let mut types = [BoxType([0; 4]); MAX_DEPTH];
        types[0] = box_type;
        Self { types, len: 1 }
    }

    /// Path of a child of this box.
    pub fn child(&self, box_type: BoxType, offset: usize) -> Result<Self> {
        if self.len == MAX_DEPTH {
            return Err(Error::malformed(
                offset,
                format!("box nesting deeper than {} below {}", MAX_DEPTH, self),
            ));
        }
        let mut next = *self;
        next.types[self.len] = box_type;
        next.len += 1;
        Ok(next)
    }

    pub fn as_slice(&self) -> &[BoxType] {
        &self.types[..self.len]
    }

    /// Type of the box this path points at.
    pub fn leaf(&self) -> BoxType {
        self.types[self.len - 1]
    }
}

impl std::fmt::Display for BoxPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, t) in self.as_slice().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoxPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxPath({})", self)
    }
}

// ---------------------------------------------------------------------------
// Low-level box writing helpers
// ---------------------------------------------------------------------------

/// Write a complete box: size (u32 BE) + type (4 ASCII bytes) + content.
pub fn write_box(box_type: BoxType, content: &[u8]) -> Vec<u8> {
    let size = (HEADER_SIZE + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&box_type.0);
    out.extend_from_slice(content);
    out
}

/// Write a container box (size + type + children concatenated).
pub fn write_container_box(box_type: BoxType, children: &[&[u8]]) -> Vec<u8> {
    let children_len: usize = children.iter().map(|c| c.len()).sum();
    let size = (HEADER_SIZE + children_len) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&box_type.0);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}
