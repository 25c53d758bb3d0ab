//! Recursive box rewriting.
//!
//! [`rewrite`] walks the top-level boxes of a buffer. Boxes the filter does
//! not declare relevant are copied verbatim. Relevant boxes are dispatched on
//! their [`BoxPath`]: containers keep their 8-byte header, have their children
//! dispatched in turn, and get a fresh size of `8 + Σ child output lengths`;
//! leaves are handed to [`BoxFilter::filter_leaf`]. Because sizes are written
//! bottom-up after the children, a leaf that grows or shrinks is reflected in
//! every enclosing box without a second pass.

use super::{parse_children, parse_top_level, read_header, BoxHeader, BoxPath, BoxType, HEADER_SIZE};
use crate::{Error, Result};

/// Byte position of a box in the input and in the output being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub input: usize,
    pub output: usize,
}

/// What a leaf handler does with its box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Copy the box unchanged.
    Keep,
    /// Emit these bytes instead. Must be a complete box whose size field
    /// equals its length.
    Replace(Vec<u8>),
    /// Drop the box.
    Remove,
}

/// Per-box-kind handlers driven by [`rewrite`].
pub trait BoxFilter {
    /// Top-level box types this filter wants dispatched.
    fn is_relevant(&self, box_type: BoxType) -> bool;

    /// Whether the box at `path` should be recursed into.
    fn is_container(&self, _path: &BoxPath) -> bool {
        false
    }

    /// Called before the children of a container are dispatched.
    fn enter_container(&mut self, _path: &BoxPath, _pos: Position) -> Result<()> {
        Ok(())
    }

    /// Called after the last child of a container.
    fn leave_container(&mut self, _path: &BoxPath, _pos: Position) -> Result<()> {
        Ok(())
    }

    /// Handle a leaf box. `data` is the whole box including its header.
    fn filter_leaf(&mut self, _path: &BoxPath, _data: &[u8], _pos: Position) -> Result<Edit> {
        Ok(Edit::Keep)
    }

    /// Hook after all top-level boxes have been processed.
    fn finish(&mut self, _top_level: &[BoxHeader]) -> Result<()> {
        Ok(())
    }
}

/// Filter that visits `moov` and `moof` trees and changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl BoxFilter for PassThrough {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        matches!(box_type, BoxType::MOOV | BoxType::MOOF)
    }

    fn is_container(&self, path: &BoxPath) -> bool {
        matches!(
            path.as_slice(),
            [BoxType::MOOV]
                | [BoxType::MOOV, BoxType::TRAK]
                | [BoxType::MOOV, BoxType::TRAK, BoxType::MDIA]
                | [BoxType::MOOV, BoxType::MVEX]
                | [BoxType::MOOF]
                | [BoxType::MOOF, BoxType::TRAF]
        )
    }
}

/// Run `filter` over every top-level box of `data` and return the output.
pub fn rewrite<F: BoxFilter + ?Sized>(data: &[u8], filter: &mut F) -> Result<Vec<u8>> {
    let top_level = parse_top_level(data)?;
    let mut out = Vec::with_capacity(data.len());

    for header in &top_level {
        if filter.is_relevant(header.box_type) {
            let path = BoxPath::top(header.box_type);
            filter_box(data, header, &path, filter, &mut out)?;
        } else {
            out.extend_from_slice(&data[header.range()]);
        }
    }

    filter.finish(&top_level)?;
    Ok(out)
}

/// Dispatch `filter` over `data` without building any output.
///
/// Leaf edits are discarded, so output positions equal input positions.
/// Used by read-only passes such as track extraction.
pub fn walk<F: BoxFilter + ?Sized>(data: &[u8], filter: &mut F) -> Result<()> {
    let top_level = parse_top_level(data)?;
    for header in &top_level {
        if filter.is_relevant(header.box_type) {
            walk_box(data, header, &BoxPath::top(header.box_type), filter)?;
        }
    }
    filter.finish(&top_level)
}

fn walk_box<F: BoxFilter + ?Sized>(
    data: &[u8],
    header: &BoxHeader,
    path: &BoxPath,
    filter: &mut F,
) -> Result<()> {
    let at = |input| Position { input, output: input };
    if filter.is_container(path) {
        filter.enter_container(path, at(header.offset))?;
        for child in parse_children(data, header)? {
            walk_box(data, &child, &path.child(child.box_type, child.offset)?, filter)?;
        }
        return filter.leave_container(path, at(header.end()));
    }
    filter.filter_leaf(path, &data[header.range()], at(header.offset))?;
    Ok(())
}

fn filter_box<F: BoxFilter + ?Sized>(
    data: &[u8],
    header: &BoxHeader,
    path: &BoxPath,
    filter: &mut F,
    out: &mut Vec<u8>,
) -> Result<()> {
    let pos = Position {
        input: header.offset,
        output: out.len(),
    };

    if filter.is_container(path) {
        filter.enter_container(path, pos)?;
        let start = out.len();
        out.extend_from_slice(&data[header.offset..header.offset + HEADER_SIZE]);
        for child in parse_children(data, header)? {
            let child_path = path.child(child.box_type, child.offset)?;
            filter_box(data, &child, &child_path, filter, out)?;
        }
        let size = u32::try_from(out.len() - start).map_err(|_| {
            Error::unsupported(format!("rewritten {} exceeds 32-bit box size", path))
        })?;
        out[start..start + 4].copy_from_slice(&size.to_be_bytes());
        filter.leave_container(
            path,
            Position {
                input: header.end(),
                output: out.len(),
            },
        )?;
        return Ok(());
    }

    match filter.filter_leaf(path, &data[header.range()], pos)? {
        Edit::Keep => out.extend_from_slice(&data[header.range()]),
        Edit::Remove => {}
        Edit::Replace(bytes) => {
            // The replacement has to describe itself: its size field is the
            // only way enclosing boxes learn the new length.
            let replaced = read_header(&bytes, 0, bytes.len())?;
            if replaced.size != bytes.len() {
                return Err(Error::malformed(
                    header.offset,
                    format!(
                        "{} handler emitted {} bytes with size field {}",
                        path,
                        bytes.len(),
                        replaced.size
                    ),
                ));
            }
            out.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{write_box, write_container_box};

    fn sample_file() -> Vec<u8> {
        let mfhd = write_box(BoxType::MFHD, &[0, 0, 0, 0, 0, 0, 0, 1]);
        let tfhd = write_box(BoxType::TFHD, &[0, 2, 0, 0, 0, 0, 0, 1]);
        let traf = write_container_box(BoxType::TRAF, &[&tfhd]);
        let moof = write_container_box(BoxType::MOOF, &[&mfhd, &traf]);
        let mut data = write_box(BoxType::FTYP, b"iso6\0\0\0\0");
        data.extend(moof);
        data.extend(write_box(BoxType::MDAT, &[1, 2, 3]));
        data
    }

    /// Appends four zero bytes to every tfhd.
    struct GrowTfhd;

    impl BoxFilter for GrowTfhd {
        fn is_relevant(&self, box_type: BoxType) -> bool {
            box_type == BoxType::MOOF
        }

        fn is_container(&self, path: &BoxPath) -> bool {
            matches!(path.as_slice(), [BoxType::MOOF] | [BoxType::MOOF, BoxType::TRAF])
        }

        fn filter_leaf(&mut self, path: &BoxPath, data: &[u8], _pos: Position) -> Result<Edit> {
            if path.leaf() != BoxType::TFHD {
                return Ok(Edit::Keep);
            }
            let mut content = data[HEADER_SIZE..].to_vec();
            content.extend_from_slice(&[0; 4]);
            Ok(Edit::Replace(write_box(BoxType::TFHD, &content)))
        }
    }

    struct BadLength;

    impl BoxFilter for BadLength {
        fn is_relevant(&self, box_type: BoxType) -> bool {
            box_type == BoxType::FTYP
        }

        fn filter_leaf(&mut self, _path: &BoxPath, data: &[u8], _pos: Position) -> Result<Edit> {
            let mut bytes = data.to_vec();
            bytes.push(0);
            Ok(Edit::Replace(bytes))
        }
    }

    #[test]
    fn test_pass_through_is_identity() {
        let data = sample_file();
        let out = rewrite(&data, &mut PassThrough).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_size_change_propagates_to_ancestors() {
        let data = sample_file();
        let out = rewrite(&data, &mut GrowTfhd).unwrap();
        assert_eq!(out.len(), data.len() + 4);

        let top = parse_top_level(&out).unwrap();
        let moof = top[1];
        assert_eq!(moof.box_type, BoxType::MOOF);
        assert_eq!(moof.size, 8 + 16 + 8 + 20);
        let children = parse_children(&out, &moof).unwrap();
        assert_eq!(children[1].box_type, BoxType::TRAF);
        assert_eq!(children[1].size, 28);
        assert_eq!(top[2].box_type, BoxType::MDAT);
    }

    #[test]
    fn test_replacement_must_match_its_size_field() {
        let data = sample_file();
        assert!(rewrite(&data, &mut BadLength).unwrap_err().is_malformed());
    }

    #[test]
    fn test_walk_visits_without_output() {
        #[derive(Default)]
        struct Visits(Vec<String>);
        impl BoxFilter for Visits {
            fn is_relevant(&self, box_type: BoxType) -> bool {
                box_type == BoxType::MOOF
            }
            fn is_container(&self, path: &BoxPath) -> bool {
                matches!(path.as_slice(), [BoxType::MOOF] | [BoxType::MOOF, BoxType::TRAF])
            }
            fn leave_container(&mut self, path: &BoxPath, pos: Position) -> Result<()> {
                self.0.push(format!("/{}@{}", path, pos.input));
                Ok(())
            }
            fn filter_leaf(&mut self, path: &BoxPath, _: &[u8], pos: Position) -> Result<Edit> {
                self.0.push(format!("{}@{}", path, pos.input));
                Ok(Edit::Remove)
            }
        }
        let data = sample_file();
        let mut visits = Visits::default();
        walk(&data, &mut visits).unwrap();
        assert_eq!(
            visits.0,
            ["moof.mfhd@24", "moof.traf.tfhd@48", "/moof.traf@64", "/moof@64"]
        );
    }

    #[test]
    fn test_remove_drops_box() {
        struct DropMdat;
        impl BoxFilter for DropMdat {
            fn is_relevant(&self, box_type: BoxType) -> bool {
                box_type == BoxType::MDAT
            }
            fn filter_leaf(&mut self, _: &BoxPath, _: &[u8], _: Position) -> Result<Edit> {
                Ok(Edit::Remove)
            }
        }
        let data = sample_file();
        let out = rewrite(&data, &mut DropMdat).unwrap();
        assert_eq!(out.len(), data.len() - 11);
    }
}
