//! Small in-place edits of fragmented files, each a [`BoxFilter`].

use tracing::debug;

use crate::boxes::{
    rewrite, BoxFilter, BoxPath, BoxType, Edit, Ftyp, HeaderKind, MediaHeader, Mfhd, Position,
    Tfdt, Trun, HEADER_SIZE,
};
use crate::track::{NON_SYNC_SAMPLE_BIT, SYNC_SAMPLE_FLAGS};
use crate::{Error, Result};

fn in_fragment(path: &BoxPath) -> bool {
    matches!(path.as_slice(), [BoxType::MOOF] | [BoxType::MOOF, BoxType::TRAF])
}

/// Adds a signed offset to every `tfdt`.
#[derive(Debug, Clone, Copy)]
pub struct ShiftDecodeTime {
    pub offset: i64,
    /// Force every `mfhd` to this sequence number.
    pub sequence_number: Option<u32>,
}

impl BoxFilter for ShiftDecodeTime {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        matches!(box_type, BoxType::MOOF | BoxType::SIDX)
    }

    fn is_container(&self, path: &BoxPath) -> bool {
        in_fragment(path)
    }

    fn filter_leaf(&mut self, path: &BoxPath, data: &[u8], pos: Position) -> Result<Edit> {
        match path.as_slice() {
            // Index timing no longer matches once the timeline moves.
            [BoxType::SIDX] => Ok(Edit::Remove),
            [BoxType::MOOF, BoxType::MFHD] => match self.sequence_number {
                Some(sequence_number) => Ok(Edit::Replace(Mfhd { sequence_number }.to_bytes())),
                None => Ok(Edit::Keep),
            },
            [BoxType::MOOF, BoxType::TRAF, BoxType::TFDT] => {
                let tfdt = Tfdt::parse(&data[HEADER_SIZE..], pos.input)?;
                let old = tfdt.base_media_decode_time();
                let shifted = (old as i128 + self.offset as i128)
                    .try_into()
                    .ok()
                    .and_then(|v: u64| tfdt.0.with_value(v))
                    .ok_or_else(|| {
                        Error::unsupported(format!(
                            "tfdt {} shifted by {} does not fit a version {} tfdt",
                            old,
                            self.offset,
                            tfdt.0.version()
                        ))
                    })?;
                debug!(from = old, to = shifted.value(), "tfdt");
                Ok(Edit::Replace(Tfdt(shifted).to_bytes()))
            }
            _ => Ok(Edit::Keep),
        }
    }
}

/// Shift every fragment's decode time by `offset`, optionally renumber the
/// fragments, and drop the `sidx`.
pub fn shift_decode_time(data: &[u8], offset: i64, sequence_number: Option<u32>) -> Result<Vec<u8>> {
    rewrite(
        data,
        &mut ShiftDecodeTime {
            offset,
            sequence_number,
        },
    )
}

/// Drops top-level `sidx` boxes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StripIndex;

impl BoxFilter for StripIndex {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        box_type == BoxType::SIDX
    }

    fn filter_leaf(&mut self, _path: &BoxPath, _data: &[u8], _pos: Position) -> Result<Edit> {
        Ok(Edit::Remove)
    }
}

pub fn strip_index(data: &[u8]) -> Result<Vec<u8>> {
    rewrite(data, &mut StripIndex)
}

/// Marks movie, track and media durations as unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveInit;

impl BoxFilter for LiveInit {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        box_type == BoxType::MOOV
    }

    fn is_container(&self, path: &BoxPath) -> bool {
        matches!(
            path.as_slice(),
            [BoxType::MOOV] | [BoxType::MOOV, BoxType::TRAK] | [BoxType::MOOV, BoxType::TRAK, BoxType::MDIA]
        )
    }

    fn filter_leaf(&mut self, path: &BoxPath, data: &[u8], pos: Position) -> Result<Edit> {
        let kind = match path.as_slice() {
            [BoxType::MOOV, BoxType::MVHD]
            | [BoxType::MOOV, BoxType::TRAK, BoxType::TKHD]
            | [BoxType::MOOV, BoxType::TRAK, BoxType::MDIA, BoxType::MDHD] => {
                HeaderKind::from_box_type(path.leaf())
            }
            _ => None,
        };
        let Some(kind) = kind else {
            return Ok(Edit::Keep);
        };
        let header = MediaHeader::parse(kind, &data[HEADER_SIZE..], pos.input)?;
        let unknown = header.duration.saturated();
        Ok(Edit::Replace(MediaHeader::with_duration(data, kind, unknown, pos.input)?))
    }
}

/// Turn an on-demand init segment into a live one.
pub fn make_live_init(data: &[u8]) -> Result<Vec<u8>> {
    rewrite(data, &mut LiveInit)
}

/// Rewrites each `trun` through `edit`.
struct TrunEdit<F> {
    /// Length of the file, bounding the sample count of column-less runs.
    file_len: usize,
    edit: F,
}

impl<F: FnMut(&mut Trun)> TrunEdit<F> {
    fn new(data: &[u8], edit: F) -> Self {
        Self {
            file_len: data.len(),
            edit,
        }
    }
}

impl<F: FnMut(&mut Trun)> BoxFilter for TrunEdit<F> {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        box_type == BoxType::MOOF
    }

    fn is_container(&self, path: &BoxPath) -> bool {
        in_fragment(path)
    }

    fn filter_leaf(&mut self, path: &BoxPath, data: &[u8], pos: Position) -> Result<Edit> {
        if path.as_slice() != [BoxType::MOOF, BoxType::TRAF, BoxType::TRUN] {
            return Ok(Edit::Keep);
        }
        let mut trun = Trun::parse(&data[HEADER_SIZE..], pos.input, self.file_len)?;
        (self.edit)(&mut trun);
        Ok(Edit::Replace(trun.to_bytes()?))
    }
}

/// Shift each run's composition offsets so its first sample has offset 0,
/// storing them signed.
pub fn shift_composition_offsets(data: &[u8]) -> Result<Vec<u8>> {
    rewrite(
        data,
        &mut TrunEdit::new(data, |trun: &mut Trun| {
            if !trun.fields.composition_time_offset {
                return;
            }
            let Some(first) = trun.samples.first().map(|s| s.composition_time_offset) else {
                return;
            };
            for s in &mut trun.samples {
                s.composition_time_offset -= first;
            }
            trun.version = 1;
        }),
    )
}

/// Set `sample_is_non_sync_sample` on every per-sample flags value other
/// than the plain sync value.
pub fn mark_non_sync_samples(data: &[u8]) -> Result<Vec<u8>> {
    rewrite(
        data,
        &mut TrunEdit::new(data, |trun: &mut Trun| {
            if !trun.fields.flags {
                return;
            }
            for s in &mut trun.samples {
                if s.flags != SYNC_SAMPLE_FLAGS {
                    s.flags |= NON_SYNC_SAMPLE_BIT;
                }
            }
        }),
    )
}

/// Replaces the `ftyp`.
#[derive(Debug, Clone)]
pub struct RewriteBrands(pub Ftyp);

impl BoxFilter for RewriteBrands {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        box_type == BoxType::FTYP
    }

    fn filter_leaf(&mut self, _path: &BoxPath, _data: &[u8], _pos: Position) -> Result<Edit> {
        Ok(Edit::Replace(self.0.to_bytes(BoxType::FTYP)))
    }
}

pub fn rewrite_brands(
    data: &[u8],
    major_brand: [u8; 4],
    minor_version: u32,
    compatible_brands: &[[u8; 4]],
) -> Result<Vec<u8>> {
    rewrite(
        data,
        &mut RewriteBrands(Ftyp {
            major_brand,
            minor_version,
            compatible_brands: compatible_brands.to_vec(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{find_path, parse_top_level, TimeField};
    use crate::fixture::TrackFixture;
    use crate::track::TrackModel;

    #[test]
    fn test_shift_decode_time() {
        let input = TrackFixture::audio(48000, 1024).fragments(3, 4).with_sidx().build();
        let out = shift_decode_time(&input, 1000, Some(9)).unwrap();
        let model = TrackModel::extract(&out).unwrap();
        assert!(model.index.is_none());
        assert_eq!(model.fragments[0].base_decode_time, 1000);
        assert_eq!(model.fragments[2].base_decode_time, 1000 + 8 * 1024);
        assert!(model.fragments.iter().all(|f| f.sequence_number == 9));
        assert!(model.timeline_gaps().is_empty());
    }

    #[test]
    fn test_shift_below_zero_rejected() {
        let input = TrackFixture::audio(48000, 1024).fragments(1, 4).build();
        assert!(shift_decode_time(&input, -1, None).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_shift_overflowing_v0_tfdt_rejected() {
        let input = TrackFixture::audio(48000, 1024).fragments(1, 4).build();
        let err = shift_decode_time(&input, u32::MAX as i64 + 1, None).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_strip_index() {
        let input = TrackFixture::audio(48000, 1024).fragments(2, 4).with_sidx().build();
        let out = strip_index(&input).unwrap();
        assert!(find_path(&out, &[BoxType::SIDX]).unwrap().is_none());
        assert_eq!(parse_top_level(&out).unwrap().len(), parse_top_level(&input).unwrap().len() - 1);
        // Samples are addressed relative to their moof, so they still resolve.
        assert_eq!(TrackModel::extract(&out).unwrap().samples.len(), 8);
    }

    #[test]
    fn test_make_live_init() {
        for fixture in [
            TrackFixture::audio(48000, 1024),
            TrackFixture::audio(48000, 1024).long_headers(),
        ] {
            let input = fixture.init_segment();
            let out = make_live_init(&input).unwrap();
            assert_eq!(out.len(), input.len());
            for (kind, path) in [
                (HeaderKind::Movie, &[BoxType::MOOV, BoxType::MVHD][..]),
                (HeaderKind::Track, &[BoxType::MOOV, BoxType::TRAK, BoxType::TKHD][..]),
                (
                    HeaderKind::Media,
                    &[BoxType::MOOV, BoxType::TRAK, BoxType::MDIA, BoxType::MDHD][..],
                ),
            ] {
                let h = find_path(&out, path).unwrap().unwrap();
                let header = MediaHeader::parse(kind, &out[h.payload_range()], h.offset).unwrap();
                assert!(matches!(
                    header.duration,
                    TimeField::V0(u32::MAX) | TimeField::V1(u64::MAX)
                ));
            }
        }
    }

    #[test]
    fn test_shift_composition_offsets() {
        let input = TrackFixture::video(90000, 3000).fragments(1, 6).build();
        // Make the first offset non-zero by moving everything forward.
        let bumped = rewrite(
            &input,
            &mut TrunEdit::new(&input, |t: &mut Trun| {
                t.version = 0;
                for s in &mut t.samples {
                    s.composition_time_offset += 3000;
                }
            }),
        )
        .unwrap();
        let out = shift_composition_offsets(&bumped).unwrap();
        let before = TrackModel::extract(&input).unwrap();
        let after = TrackModel::extract(&out).unwrap();
        let offsets = |m: &TrackModel| m.samples.iter().map(|s| s.composition_time_offset).collect::<Vec<_>>();
        assert_eq!(offsets(&after), offsets(&before));
        assert_eq!(after.samples[2].composition_time_offset, -3000);
    }

    #[test]
    fn test_mark_non_sync_samples() {
        let input = TrackFixture::video(90000, 3000).fragments(1, 4).build();
        let cleared = rewrite(
            &input,
            &mut TrunEdit::new(&input, |t: &mut Trun| {
                // Dependent samples without the non-sync bit.
                for s in t.samples.iter_mut().skip(1) {
                    s.flags = 0x0100_0000;
                }
            }),
        )
        .unwrap();
        let out = mark_non_sync_samples(&cleared).unwrap();
        let model = TrackModel::extract(&out).unwrap();
        assert!(model.samples[0].is_sync());
        assert!(model.samples[1..].iter().all(|s| !s.is_sync()));
        assert_eq!(model.samples[1].flags, 0x0101_0000);
    }

    #[test]
    fn test_rewrite_brands_changes_length() {
        let input = TrackFixture::audio(48000, 1024).fragments(1, 2).build();
        let out = rewrite_brands(&input, *b"cmf2", 0, &[*b"cmf2"]).unwrap();
        let ftyp = find_path(&out, &[BoxType::FTYP]).unwrap().unwrap();
        let parsed = Ftyp::parse(&out[ftyp.payload_range()], 0).unwrap();
        assert_eq!(parsed.major_brand, *b"cmf2");
        assert_eq!(parsed.compatible_brands, vec![*b"cmf2"]);
        assert_eq!(out.len(), input.len() - 8);
        assert_eq!(TrackModel::extract(&out).unwrap().samples.len(), 2);
    }
}
