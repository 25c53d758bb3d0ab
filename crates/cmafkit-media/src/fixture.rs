//! Synthetic single-track CMAF files for tests.
//!
//! The init part is minimal (`ftyp`, `moov` with `mvhd`, one `trak` holding
//! `tkhd` and `mdia`/`mdhd`/`hdlr`, and `mvex`/`trex`) since nothing here
//! decodes media. Sample payloads are deterministic so tests can check that
//! bytes survive a rewrite.

use bytes::{BufMut, BytesMut};

use crate::boxes::{
    write_box, write_container_box, BoxType, Ftyp, Mfhd, SampleFields, Sidx, SidxReference,
    SidxTiming, Tfdt, Tfhd, TimeField, Trex, Trun, TrunSample,
};
use crate::codec::put_version_flags;
use crate::track::{NON_SYNC_SAMPLE_BIT, SYNC_SAMPLE_FLAGS};

/// Builder for a fragmented track file.
#[derive(Debug, Clone)]
pub struct TrackFixture {
    track_id: u32,
    timescale: u32,
    handler: [u8; 4],
    durations: Vec<u32>,
    uniform_size: Option<u32>,
    fragments: Vec<usize>,
    gaps: Vec<(usize, u64)>,
    start_time: u64,
    header_version: u8,
    sidx: bool,
    sidx_first_offset: u64,
    styp: bool,
    hoist_in_trex: bool,
    per_sample_flags: bool,
    composition_offsets: bool,
}

impl TrackFixture {
    fn new(handler: [u8; 4], timescale: u32, sample_duration: u32) -> Self {
        Self {
            track_id: 1,
            timescale,
            handler,
            durations: vec![sample_duration],
            uniform_size: None,
            fragments: vec![1],
            gaps: Vec::new(),
            start_time: 0,
            header_version: 0,
            sidx: false,
            sidx_first_offset: 0,
            styp: false,
            hoist_in_trex: false,
            per_sample_flags: false,
            composition_offsets: false,
        }
    }

    /// Audio track: every sample is a sync sample, flags come from `trex`.
    pub fn audio(timescale: u32, sample_duration: u32) -> Self {
        Self::new(*b"soun", timescale, sample_duration)
    }

    /// Video track: per-sample flags with a sync sample opening each
    /// fragment, and per-sample composition offsets.
    pub fn video(timescale: u32, sample_duration: u32) -> Self {
        let mut fixture = Self::new(*b"vide", timescale, sample_duration);
        fixture.per_sample_flags = true;
        fixture.composition_offsets = true;
        fixture
    }

    pub fn track_id(mut self, track_id: u32) -> Self {
        self.track_id = track_id;
        self
    }

    /// `count` fragments of `samples_per_fragment` samples each.
    pub fn fragments(mut self, count: usize, samples_per_fragment: usize) -> Self {
        self.fragments = vec![samples_per_fragment; count];
        self
    }

    /// Explicit sample count per fragment.
    pub fn fragment_sizes(mut self, sizes: &[usize]) -> Self {
        self.fragments = sizes.to_vec();
        self
    }

    /// Sample `i` lasts `pattern[i % pattern.len()]`.
    pub fn duration_pattern(mut self, pattern: &[u32]) -> Self {
        self.durations = pattern.to_vec();
        self
    }

    pub fn uniform_sample_size(mut self, size: u32) -> Self {
        self.uniform_size = Some(size);
        self
    }

    /// Add `gap` to the `tfdt` of fragment `index` and all later ones.
    pub fn decode_time_gap(mut self, index: usize, gap: u64) -> Self {
        self.gaps.push((index, gap));
        self
    }

    pub fn start_time(mut self, start_time: u64) -> Self {
        self.start_time = start_time;
        self
    }

    /// Version 1 mvhd, tkhd and mdhd.
    pub fn long_headers(mut self) -> Self {
        self.header_version = 1;
        self
    }

    pub fn with_sidx(mut self) -> Self {
        self.sidx = true;
        self
    }

    /// Write a sidx whose first offset is `offset` instead of 0.
    pub fn sidx_first_offset(mut self, offset: u64) -> Self {
        self.sidx = true;
        self.sidx_first_offset = offset;
        self
    }

    /// Put an `styp` before every fragment.
    pub fn with_styp(mut self) -> Self {
        self.styp = true;
        self
    }

    /// Carry sample durations in `trex` instead of in each `trun`.
    pub fn hoist_in_trex(mut self) -> Self {
        self.hoist_in_trex = true;
        self
    }

    pub fn sample_count(&self) -> usize {
        self.fragments.iter().sum()
    }

    pub fn sample_duration(&self, i: usize) -> u32 {
        self.durations[i % self.durations.len()]
    }

    pub fn sample_size(&self, i: usize) -> u32 {
        self.uniform_size.unwrap_or(8 + (i as u32 * 7) % 13)
    }

    pub fn sample_payload(&self, i: usize) -> Vec<u8> {
        (0..self.sample_size(i))
            .map(|j| (i as u8).wrapping_mul(31).wrapping_add(j as u8))
            .collect()
    }

    fn composition_offset(&self, i: usize) -> i64 {
        if !self.composition_offsets {
            return 0;
        }
        // I P B pattern shifted so the first sample presents at its decode time.
        [0, 2, -1][i % 3] * self.sample_duration(i) as i64
    }

    /// `ftyp` + `moov`.
    pub fn init_segment(&self) -> Vec<u8> {
        let ftyp = Ftyp {
            major_brand: *b"iso6",
            minor_version: 0,
            compatible_brands: vec![*b"iso6", *b"cmfc", *b"dash"],
        }
        .to_bytes(BoxType::FTYP);

        let mdhd = self.write_mdhd();
        let hdlr = write_hdlr(&self.handler);
        let mdia = write_container_box(BoxType::MDIA, &[&mdhd, &hdlr]);
        let tkhd = self.write_tkhd();
        let trak = write_container_box(BoxType::TRAK, &[&tkhd, &mdia]);

        let trex = Trex {
            track_id: self.track_id,
            default_sample_description_index: 1,
            default_sample_duration: if self.hoist_in_trex { self.durations[0] } else { 0 },
            default_sample_size: 0,
            default_sample_flags: SYNC_SAMPLE_FLAGS,
        }
        .to_bytes();
        let mvex = write_container_box(BoxType::MVEX, &[&trex]);
        let mvhd = self.write_mvhd();
        let moov = write_container_box(BoxType::MOOV, &[&mvhd, &trak, &mvex]);

        let mut out = ftyp;
        out.extend(moov);
        out
    }

    /// The complete file.
    pub fn build(&self) -> Vec<u8> {
        let mut out = self.init_segment();
        let mut segments = Vec::new();
        let mut references = Vec::new();
        let mut sample = 0;
        let mut decode_time = self.start_time;

        for (index, &count) in self.fragments.iter().enumerate() {
            decode_time += self
                .gaps
                .iter()
                .filter(|(at, _)| *at == index)
                .map(|(_, gap)| gap)
                .sum::<u64>();
            let samples = sample..sample + count;
            let segment = self.write_fragment(index as u32 + 1, decode_time, samples.clone());
            let duration: u64 = samples.clone().map(|i| self.sample_duration(i) as u64).sum();

            references.push(SidxReference::media(segment.len() as u32, duration as u32));
            segments.extend(segment);
            decode_time += duration;
            sample = samples.end;
        }

        if self.sidx {
            let sidx = Sidx {
                reference_id: self.track_id,
                timescale: self.timescale,
                timing: SidxTiming::for_values(self.start_time, self.sidx_first_offset),
                references,
            };
            // Fixture sizes stay far below the sidx field limits.
            out.extend(sidx.to_bytes().expect("fixture sidx fits"));
        }
        out.extend(segments);
        out
    }

    fn write_fragment(&self, sequence_number: u32, decode_time: u64, samples: std::ops::Range<usize>) -> Vec<u8> {
        let first = samples.start;
        let entries: Vec<TrunSample> = samples
            .clone()
            .map(|i| TrunSample {
                duration: self.sample_duration(i),
                size: self.sample_size(i),
                flags: if i == first {
                    SYNC_SAMPLE_FLAGS
                } else {
                    SYNC_SAMPLE_FLAGS | NON_SYNC_SAMPLE_BIT
                },
                composition_time_offset: self.composition_offset(i),
            })
            .collect();

        let mut trun = Trun {
            version: self.composition_offsets as u8,
            data_offset: Some(0),
            first_sample_flags: None,
            fields: SampleFields {
                duration: !self.hoist_in_trex,
                size: true,
                flags: self.per_sample_flags,
                composition_time_offset: self.composition_offsets,
            },
            samples: entries,
        };

        let mfhd = Mfhd { sequence_number }.to_bytes();
        let tfhd = Tfhd {
            track_id: self.track_id,
            default_base_is_moof: true,
            ..Default::default()
        }
        .to_bytes();
        let tfdt = Tfdt(TimeField::for_value(decode_time)).to_bytes();
        let moof_len = 8 + mfhd.len() + 8 + tfhd.len() + tfdt.len() + trun.encoded_len();
        trun.data_offset = Some(moof_len as i32 + 8);
        let trun = trun.to_bytes().expect("fixture trun fits");

        let traf = write_container_box(BoxType::TRAF, &[&tfhd, &tfdt, &trun]);
        let moof = write_container_box(BoxType::MOOF, &[&mfhd, &traf]);
        let payload: Vec<u8> = samples.flat_map(|i| self.sample_payload(i)).collect();

        let mut out = Vec::new();
        if self.styp {
            out.extend(
                Ftyp {
                    major_brand: *b"msdh",
                    minor_version: 0,
                    compatible_brands: vec![*b"msdh", *b"msix"],
                }
                .to_bytes(BoxType::STYP),
            );
        }
        out.extend(moof);
        out.extend(write_box(BoxType::MDAT, &payload));
        out
    }

    fn put_times(&self, content: &mut BytesMut) {
        if self.header_version == 1 {
            content.put_u64(0); // creation_time
            content.put_u64(0); // modification_time
        } else {
            content.put_u32(0);
            content.put_u32(0);
        }
    }

    fn put_duration(&self, content: &mut BytesMut) {
        if self.header_version == 1 {
            content.put_u64(0);
        } else {
            content.put_u32(0);
        }
    }

    fn write_mvhd(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(112);
        put_version_flags(&mut content, self.header_version, 0);
        self.put_times(&mut content);
        content.put_u32(self.timescale);
        self.put_duration(&mut content);
        content.put_u32(0x0001_0000); // rate 1.0
        content.put_u16(0x0100); // volume 1.0
        content.put_slice(&[0u8; 10]);
        put_identity_matrix(&mut content);
        content.put_slice(&[0u8; 24]);
        content.put_u32(self.track_id + 1); // next_track_ID
        write_box(BoxType::MVHD, &content)
    }

    fn write_tkhd(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(96);
        // enabled | in_movie | in_preview
        put_version_flags(&mut content, self.header_version, 7);
        self.put_times(&mut content);
        content.put_u32(self.track_id);
        content.put_u32(0);
        self.put_duration(&mut content);
        content.put_slice(&[0u8; 8]);
        content.put_u16(0); // layer
        content.put_u16(0); // alternate_group
        content.put_u16(if &self.handler == b"soun" { 0x0100 } else { 0 });
        content.put_u16(0);
        put_identity_matrix(&mut content);
        content.put_u32(0); // width
        content.put_u32(0); // height
        write_box(BoxType::TKHD, &content)
    }

    fn write_mdhd(&self) -> Vec<u8> {
        let mut content = BytesMut::with_capacity(32);
        put_version_flags(&mut content, self.header_version, 0);
        self.put_times(&mut content);
        content.put_u32(self.timescale);
        self.put_duration(&mut content);
        content.put_u16(0x55C4); // language "und"
        content.put_u16(0);
        write_box(BoxType::MDHD, &content)
    }
}

fn put_identity_matrix(content: &mut BytesMut) {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        content.put_u32(v);
    }
}

fn write_hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut content = BytesMut::with_capacity(32);
    put_version_flags(&mut content, 0, 0);
    content.put_u32(0); // pre_defined
    content.put_slice(handler);
    content.put_slice(&[0u8; 12]);
    content.put_slice(b"cmafkit\0");
    write_box(BoxType::HDLR, &content)
}
