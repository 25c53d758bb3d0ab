//! Track extraction as a read-only [`BoxFilter`] pass.

use std::ops::Range;

use tracing::debug;

use super::{Fragment, IndexModel, Sample, TrackDefaults, TrackModel};
use crate::boxes::{
    walk, BoxFilter, BoxHeader, BoxPath, BoxType, Edit, HandlerType, Hdlr, HeaderKind, MediaHeader, Mfhd,
    Position, Sidx, Tfdt, Tfhd, Trex, Trun, HEADER_SIZE,
};
use crate::{Error, Result};

pub(super) fn extract(data: &[u8]) -> Result<TrackModel> {
    let mut extractor = Extractor::new(data);
    walk(data, &mut extractor)?;
    extractor.into_model()
}

/// Per-`moof` context. Starts from the track defaults and is refined by
/// the fragment's `tfhd`.
#[derive(Debug)]
struct FragmentState {
    /// The `styp` in front of the `moof`, if any, else the `moof` itself.
    segment_start: usize,
    moof_start: usize,
    sequence_number: u32,
    defaults: TrackDefaults,
    data_base: u64,
    tfhd_seen: bool,
    base_decode_time: Option<u64>,
    traf_count: usize,
    trun: Option<Trun>,
}

impl FragmentState {
    fn new(segment_start: usize, moof_start: usize, defaults: TrackDefaults) -> Self {
        Self {
            segment_start,
            moof_start,
            sequence_number: 0,
            defaults,
            data_base: moof_start as u64,
            tfhd_seen: false,
            base_decode_time: None,
            traf_count: 0,
            trun: None,
        }
    }

    fn apply_tfhd(&mut self, tfhd: &Tfhd) {
        if let Some(v) = tfhd.default_sample_duration {
            self.defaults.default_sample_duration = v;
        }
        if let Some(v) = tfhd.default_sample_size {
            self.defaults.default_sample_size = v;
        }
        if let Some(v) = tfhd.default_sample_flags {
            self.defaults.default_sample_flags = v;
        }
        if let Some(base) = tfhd.base_data_offset {
            self.data_base = base;
        }
        self.tfhd_seen = true;
    }
}

/// A fully parsed `moof` waiting for its `mdat`.
#[derive(Debug)]
struct PendingFragment {
    state: FragmentState,
    base_decode_time: u64,
    trun: Trun,
}

struct Extractor<'a> {
    data: &'a [u8],
    track_id: Option<u32>,
    handler_type: Option<HandlerType>,
    track_count: usize,
    defaults: TrackDefaults,
    timescale_seen: bool,
    samples: Vec<Sample>,
    fragments: Vec<Fragment>,
    index: Option<IndexModel>,
    styp: Option<Range<usize>>,
    header_end: Option<usize>,
    segment_start: Option<usize>,
    current: Option<FragmentState>,
    pending: Option<PendingFragment>,
}

impl<'a> Extractor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            track_id: None,
            handler_type: None,
            track_count: 0,
            defaults: TrackDefaults::default(),
            timescale_seen: false,
            samples: Vec::new(),
            fragments: Vec::new(),
            index: None,
            styp: None,
            header_end: None,
            segment_start: None,
            current: None,
            pending: None,
        }
    }

    fn mark_header_end(&mut self, offset: usize) {
        self.header_end.get_or_insert(offset);
    }

    fn fragment(&mut self, path: &BoxPath) -> Result<&mut FragmentState> {
        self.current
            .as_mut()
            .ok_or_else(|| Error::malformed(0, format!("{} outside of a moof", path)))
    }

    fn close_moof(&mut self) -> Result<()> {
        let Some(mut state) = self.current.take() else {
            return Ok(());
        };
        if let Some(pending) = &self.pending {
            return Err(Error::malformed(
                pending.state.moof_start,
                "moof is not followed by an mdat",
            ));
        }
        if !state.tfhd_seen {
            return Err(Error::MissingBox("tfhd"));
        }
        let base_decode_time = state.base_decode_time.ok_or(Error::MissingBox("tfdt"))?;
        let trun = state.trun.take().ok_or(Error::MissingBox("trun"))?;
        self.pending = Some(PendingFragment {
            state,
            base_decode_time,
            trun,
        });
        Ok(())
    }

    /// Resolve the pending fragment's samples now that its `mdat` is known.
    fn attach_mdat(&mut self, mdat_end: usize) -> Result<()> {
        let Some(PendingFragment {
            state,
            base_decode_time,
            trun,
        }) = self.pending.take()
        else {
            debug!("mdat without a preceding moof, skipped");
            return Ok(());
        };

        let data_offset = trun.data_offset.ok_or_else(|| {
            Error::unsupported(format!(
                "trun without data offset in fragment {}",
                state.sequence_number
            ))
        })?;
        let first = state.data_base as i128 + data_offset as i128;
        let mut byte_offset = u64::try_from(first).map_err(|_| {
            Error::malformed(state.moof_start, format!("trun data offset {} before file start", data_offset))
        })?;

        let first_index = self.samples.len();
        let mut decode_time = base_decode_time;
        let d = &state.defaults;

        for (i, entry) in trun.samples.iter().enumerate() {
            let duration = if trun.fields.duration { entry.duration } else { d.default_sample_duration };
            let size = if trun.fields.size { entry.size } else { d.default_sample_size };
            let flags = match (trun.fields.flags, trun.first_sample_flags) {
                (true, _) => entry.flags,
                (false, Some(first)) if i == 0 => first,
                _ => d.default_sample_flags,
            };
            let composition_time_offset = if trun.fields.composition_time_offset {
                entry.composition_time_offset
            } else {
                d.default_cto
            };

            if let Some(prev) = self.samples.last() {
                if byte_offset < prev.byte_range().end {
                    return Err(Error::malformed(
                        byte_offset as usize,
                        format!(
                            "sample {} overlaps the previous sample ending at {}",
                            self.samples.len(),
                            prev.byte_range().end
                        ),
                    ));
                }
            }
            let end = byte_offset.saturating_add(size as u64);
            if end > self.data.len() as u64 {
                return Err(Error::malformed(
                    byte_offset as usize,
                    format!("sample {} data ends past the buffer ({} > {})", self.samples.len(), end, self.data.len()),
                ));
            }

            self.samples.push(Sample {
                start_decode_time: decode_time,
                duration,
                size,
                byte_offset,
                flags,
                composition_time_offset,
            });
            decode_time = decode_time.checked_add(duration as u64).ok_or_else(|| {
                Error::malformed(
                    state.moof_start,
                    format!(
                        "decode time of fragment {} overflows 64 bits after sample {}",
                        state.sequence_number,
                        self.samples.len()
                    ),
                )
            })?;
            byte_offset = end;
        }

        debug!(
            sequence_number = state.sequence_number,
            base_decode_time,
            samples = trun.samples.len(),
            "fragment"
        );
        self.fragments.push(Fragment {
            sequence_number: state.sequence_number,
            base_decode_time,
            sample_range: first_index..self.samples.len(),
            byte_range: state.segment_start as u64..mdat_end as u64,
            duration: decode_time - base_decode_time,
        });
        Ok(())
    }

    fn into_model(self) -> Result<TrackModel> {
        if !self.timescale_seen {
            return Err(Error::MissingBox("mdhd"));
        }
        Ok(TrackModel {
            track_id: self.track_id.unwrap_or_default(),
            handler_type: self.handler_type,
            defaults: self.defaults,
            samples: self.samples,
            fragments: self.fragments,
            index: self.index,
            styp: self.styp,
            header_end: self.header_end.unwrap_or(self.data.len()),
        })
    }
}

impl BoxFilter for Extractor<'_> {
    fn is_relevant(&self, box_type: BoxType) -> bool {
        matches!(
            box_type,
            BoxType::MOOV | BoxType::SIDX | BoxType::STYP | BoxType::MOOF | BoxType::MDAT | BoxType::EMSG
        )
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

    fn enter_container(&mut self, path: &BoxPath, pos: Position) -> Result<()> {
        match path.as_slice() {
            [BoxType::MOOV, BoxType::TRAK] => {
                self.track_count += 1;
                if self.track_count > 1 {
                    return Err(Error::unsupported("more than one trak in moov"));
                }
            }
            [BoxType::MOOF] => {
                self.mark_header_end(pos.input);
                if let Some(pending) = &self.pending {
                    return Err(Error::malformed(
                        pending.state.moof_start,
                        "moof is not followed by an mdat",
                    ));
                }
                let segment_start = self.segment_start.take().unwrap_or(pos.input);
                self.current = Some(FragmentState::new(segment_start, pos.input, self.defaults));
            }
            [BoxType::MOOF, BoxType::TRAF] => {
                let state = self.fragment(path)?;
                state.traf_count += 1;
                if state.traf_count > 1 {
                    return Err(Error::unsupported(format!(
                        "more than one traf in moof at offset {}",
                        state.moof_start
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn leave_container(&mut self, path: &BoxPath, _pos: Position) -> Result<()> {
        if path.as_slice() == [BoxType::MOOF] {
            self.close_moof()?;
        }
        Ok(())
    }

    fn filter_leaf(&mut self, path: &BoxPath, data: &[u8], pos: Position) -> Result<Edit> {
        let offset = pos.input;
        let payload = &data[HEADER_SIZE..];

        match path.as_slice() {
            [BoxType::EMSG] => {
                return Err(Error::unsupported(format!("emsg box at offset {}", offset)));
            }
            [BoxType::STYP] => {
                self.mark_header_end(offset);
                if self.styp.is_none() {
                    self.styp = Some(offset..offset + data.len());
                }
                self.segment_start.get_or_insert(offset);
            }
            [BoxType::SIDX] => {
                self.mark_header_end(offset);
                if self.index.is_some() {
                    return Err(Error::unsupported(format!("second sidx at offset {}", offset)));
                }
                let sidx = Sidx::parse(payload, offset)?;
                self.index = Some(IndexModel::from_sidx(&sidx, (offset + data.len()) as u64)?);
            }
            [BoxType::MDAT] => self.attach_mdat(offset + data.len())?,

            [BoxType::MOOV, BoxType::TRAK, BoxType::TKHD] => {
                let tkhd = MediaHeader::parse(HeaderKind::Track, payload, offset)?;
                self.track_id = tkhd.track_id;
            }
            [BoxType::MOOV, BoxType::TRAK, BoxType::MDIA, BoxType::MDHD] => {
                let mdhd = MediaHeader::parse(HeaderKind::Media, payload, offset)?;
                self.defaults.timescale = mdhd.timescale.unwrap_or_default();
                self.timescale_seen = true;
            }
            [BoxType::MOOV, BoxType::TRAK, BoxType::MDIA, BoxType::HDLR] => {
                self.handler_type = Some(Hdlr::parse(payload, offset)?.handler_type);
            }
            [BoxType::MOOV, BoxType::MVEX, BoxType::TREX] => {
                let trex = Trex::parse(payload, offset)?;
                self.defaults.default_sample_duration = trex.default_sample_duration;
                self.defaults.default_sample_size = trex.default_sample_size;
                self.defaults.default_sample_flags = trex.default_sample_flags;
            }

            [BoxType::MOOF, BoxType::MFHD] => {
                let mfhd = Mfhd::parse(payload, offset)?;
                self.fragment(path)?.sequence_number = mfhd.sequence_number;
            }
            [BoxType::MOOF, BoxType::TRAF, BoxType::TFHD] => {
                let tfhd = Tfhd::parse(payload, offset)?;
                self.track_id.get_or_insert(tfhd.track_id);
                self.fragment(path)?.apply_tfhd(&tfhd);
            }
            [BoxType::MOOF, BoxType::TRAF, BoxType::TFDT] => {
                let tfdt = Tfdt::parse(payload, offset)?;
                self.fragment(path)?.base_decode_time = Some(tfdt.base_media_decode_time());
            }
            [BoxType::MOOF, BoxType::TRAF, BoxType::TRUN] => {
                // Every sample of a column-less run takes its default size
                // from the file, or at least one byte.
                let default_size = self.fragment(path)?.defaults.default_sample_size.max(1) as usize;
                let trun = Trun::parse(payload, offset, self.data.len() / default_size)?;
                if trun.first_sample_flags.is_some() && trun.fields.flags {
                    return Err(Error::unsupported(format!(
                        "trun at offset {} has both first-sample and per-sample flags",
                        offset
                    )));
                }
                let state = self.fragment(path)?;
                if state.trun.is_some() {
                    return Err(Error::unsupported(format!(
                        "more than one trun in fragment {}",
                        state.sequence_number
                    )));
                }
                state.trun = Some(trun);
            }
            _ => {}
        }
        Ok(Edit::Keep)
    }

    fn finish(&mut self, _top_level: &[BoxHeader]) -> Result<()> {
        if let Some(pending) = &self.pending {
            return Err(Error::malformed(
                pending.state.moof_start,
                "moof is not followed by an mdat",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{write_box, write_container_box, SampleFields, TimeField, TrunSample};
    use crate::codec::put_version_flags;
    use bytes::{BufMut, BytesMut};
    use crate::fixture::TrackFixture;
    use crate::track::SYNC_SAMPLE_FLAGS;

    #[test]
    fn test_extract_fixture_track() {
        let fixture = TrackFixture::audio(48000, 1024).fragments(3, 94).with_sidx();
        let data = fixture.build();
        let model = TrackModel::extract(&data).unwrap();

        assert_eq!(model.track_id, 1);
        assert_eq!(model.timescale(), 48000);
        assert!(model.handler_type.unwrap().is_audio());
        assert_eq!(model.samples.len(), 282);
        assert_eq!(model.fragments.len(), 3);
        assert_eq!(model.fragments[1].sample_range, 94..188);
        assert_eq!(model.fragments[1].base_decode_time, 94 * 1024);
        assert_eq!(model.total_duration(), 282 * 1024);
        assert!(model.timeline_gaps().is_empty());

        let index = model.index.as_ref().unwrap();
        assert_eq!(index.segments.len(), 3);
        for (seg, frag) in index.segments.iter().zip(&model.fragments) {
            assert_eq!(seg.offset, frag.byte_range.start);
            assert_eq!(seg.referenced_size as u64, frag.byte_size());
            assert_eq!(seg.subsegment_duration as u64, frag.duration);
        }
    }

    #[test]
    fn test_sample_bytes_resolve_into_mdat() {
        let fixture = TrackFixture::video(90000, 3000).fragments(2, 3);
        let data = fixture.build();
        let model = TrackModel::extract(&data).unwrap();

        for (i, s) in model.samples.iter().enumerate() {
            let bytes = &data[s.byte_range().start as usize..s.byte_range().end as usize];
            assert_eq!(bytes, fixture.sample_payload(i).as_slice());
        }
        assert_eq!(model.samples[0].flags, SYNC_SAMPLE_FLAGS);
        assert!(!model.samples[1].is_sync());
    }

    #[test]
    fn test_header_end_and_styp() {
        let data = TrackFixture::audio(48000, 1024).fragments(2, 4).with_styp().with_sidx().build();
        let model = TrackModel::extract(&data).unwrap();
        let top = crate::boxes::parse_top_level(&data).unwrap();
        assert_eq!(top[2].box_type, BoxType::SIDX);
        assert_eq!(model.header_end, top[2].offset);
        assert_eq!(model.styp, Some(top[3].range()));
    }

    #[test]
    fn test_trex_defaults_fill_missing_columns() {
        let data = TrackFixture::audio(48000, 1024)
            .fragments(1, 5)
            .hoist_in_trex()
            .build();
        let model = TrackModel::extract(&data).unwrap();
        assert!(model.samples.iter().all(|s| s.duration == 1024));
        assert_eq!(model.defaults.default_sample_duration, 1024);
        assert_eq!(model.fragments[0].duration, 5 * 1024);
    }

    fn moof_from(trun: &[u8], decode_time: TimeField, extra: &[&[u8]]) -> Vec<u8> {
        let mfhd = Mfhd { sequence_number: 1 }.to_bytes();
        let tfhd = Tfhd {
            track_id: 1,
            default_base_is_moof: true,
            ..Default::default()
        }
        .to_bytes();
        let tfdt = Tfdt(decode_time).to_bytes();
        let mut children: Vec<&[u8]> = vec![&tfhd, &tfdt, trun];
        children.extend_from_slice(extra);
        let traf = write_container_box(BoxType::TRAF, &children);
        write_container_box(BoxType::MOOF, &[&mfhd, &traf])
    }

    fn moof_with(trun: Trun, extra: &[&[u8]]) -> Vec<u8> {
        moof_from(&trun.to_bytes().unwrap(), TimeField::V0(0), extra)
    }

    fn with_init(rest: &[u8]) -> Vec<u8> {
        let mut data = TrackFixture::audio(1000, 10).init_segment();
        data.extend_from_slice(rest);
        data
    }

    fn one_sample_trun(data_offset: Option<i32>) -> Trun {
        Trun {
            version: 0,
            data_offset,
            first_sample_flags: None,
            fields: SampleFields {
                duration: true,
                size: true,
                ..Default::default()
            },
            samples: vec![TrunSample {
                duration: 10,
                size: 4,
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_missing_data_offset_unsupported() {
        let mut rest = moof_with(one_sample_trun(None), &[]);
        rest.extend(write_box(BoxType::MDAT, &[1, 2, 3, 4]));
        let err = TrackModel::extract(&with_init(&rest)).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_conflicting_sample_flags_unsupported() {
        let mut trun = one_sample_trun(Some(0));
        trun.first_sample_flags = Some(SYNC_SAMPLE_FLAGS);
        trun.fields.flags = true;
        let mut rest = moof_with(trun, &[]);
        rest.extend(write_box(BoxType::MDAT, &[0; 4]));
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_second_trun_unsupported() {
        let second = one_sample_trun(Some(0)).to_bytes().unwrap();
        let mut rest = moof_with(one_sample_trun(Some(0)), &[&second]);
        rest.extend(write_box(BoxType::MDAT, &[0; 8]));
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_emsg_unsupported() {
        let mut rest = write_box(BoxType::EMSG, &[0; 16]);
        rest.extend(moof_with(one_sample_trun(Some(0)), &[]));
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_moof_without_mdat_malformed() {
        let rest = moof_with(one_sample_trun(Some(0)), &[]);
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_malformed());
    }

    #[test]
    fn test_sample_past_buffer_malformed() {
        let moof = moof_with(one_sample_trun(Some(0)), &[]);
        let offset = moof.len() as i32 + 8;
        let mut rest = moof_with(one_sample_trun(Some(offset)), &[]);
        rest.extend(write_box(BoxType::MDAT, &[0; 2]));
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_malformed());
    }

    #[test]
    fn test_missing_tfdt() {
        let mfhd = Mfhd { sequence_number: 1 }.to_bytes();
        let tfhd = Tfhd {
            track_id: 1,
            ..Default::default()
        }
        .to_bytes();
        let trun = one_sample_trun(Some(0)).to_bytes().unwrap();
        let traf = write_container_box(BoxType::TRAF, &[&tfhd, &trun]);
        let mut rest = write_container_box(BoxType::MOOF, &[&mfhd, &traf]);
        rest.extend(write_box(BoxType::MDAT, &[0; 4]));
        assert!(matches!(
            TrackModel::extract(&with_init(&rest)),
            Err(Error::MissingBox("tfdt"))
        ));
    }

    #[test]
    fn test_base_data_offset_overrides_moof_start() {
        let moof = |base: u64| {
            let mfhd = Mfhd { sequence_number: 1 }.to_bytes();
            let tfhd = Tfhd {
                track_id: 1,
                base_data_offset: Some(base),
                ..Default::default()
            }
            .to_bytes();
            let tfdt = Tfdt(TimeField::V0(0)).to_bytes();
            let trun = one_sample_trun(Some(0)).to_bytes().unwrap();
            let traf = write_container_box(BoxType::TRAF, &[&tfhd, &tfdt, &trun]);
            write_container_box(BoxType::MOOF, &[&mfhd, &traf])
        };
        // Point the base four bytes into the mdat payload.
        let base = (with_init(&[]).len() + moof(0).len() + 8 + 4) as u64;
        let mut rest = moof(base);
        rest.extend(write_box(BoxType::MDAT, &[9, 9, 9, 9, 7, 7, 7, 7]));

        let data = with_init(&rest);
        let model = TrackModel::extract(&data).unwrap();
        let s = model.samples[0];
        assert_eq!(s.byte_offset, base);
        assert_eq!(&data[s.byte_offset as usize..][..4], &[7, 7, 7, 7]);
    }

    #[test]
    fn test_column_less_trun_count_bounded_by_file() {
        let mut content = BytesMut::new();
        put_version_flags(&mut content, 0, Trun::DATA_OFFSET);
        content.put_u32(20_000_000);
        content.put_i32(0);
        let trun = write_box(BoxType::TRUN, &content);

        let mut rest = moof_from(&trun, TimeField::V0(0), &[]);
        rest.extend(write_box(BoxType::MDAT, &[0; 4]));
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_malformed());
    }

    #[test]
    fn test_decode_time_overflow_malformed() {
        let mut trun = one_sample_trun(Some(0));
        trun.samples.push(trun.samples[0]);
        let start = TimeField::V1(u64::MAX - 5);
        let offset = moof_from(&trun.to_bytes().unwrap(), start, &[]).len() as i32 + 8;
        trun.data_offset = Some(offset);

        let mut rest = moof_from(&trun.to_bytes().unwrap(), start, &[]);
        rest.extend(write_box(BoxType::MDAT, &[0; 8]));
        assert!(TrackModel::extract(&with_init(&rest)).unwrap_err().is_malformed());
    }

    #[test]
    fn test_sidx_offset_overflow_malformed() {
        let data = TrackFixture::audio(48000, 1024)
            .fragments(1, 2)
            .sidx_first_offset(u64::MAX)
            .build();
        assert!(TrackModel::extract(&data).unwrap_err().is_malformed());
    }

    #[test]
    fn test_second_sidx_unsupported() {
        let fixture = TrackFixture::audio(48000, 1024).fragments(1, 2).with_sidx();
        let data = fixture.build();
        let top = crate::boxes::parse_top_level(&data).unwrap();
        let sidx = &data[top[2].range()];
        let mut doubled = data[..top[2].end()].to_vec();
        doubled.extend_from_slice(sidx);
        doubled.extend_from_slice(&data[top[2].end()..]);
        assert!(TrackModel::extract(&doubled).unwrap_err().is_unsupported());
    }
}
