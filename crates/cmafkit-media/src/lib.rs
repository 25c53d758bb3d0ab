//! cmafkit-media: ISO BMFF box engine, track model and resegmentation for
//! fragmented CMAF / DASH-OnDemand tracks.
//!
//! # Modules
//!
//! - [`codec`] - Checked big-endian field access
//! - [`boxes`] - Box headers, the recursive rewrite engine, typed box records
//! - [`track`] - Sample timeline and segment index of one track file
//! - [`segment`] - Segment planning and fragment/sidx writing
//! - [`filters`] - Small box edits (tfdt shift, sidx removal, live init, ...)
//!
//! # Architecture
//!
//! Every operation takes the whole file as a byte slice and returns a new
//! buffer, so callers decide about I/O and backups:
//!
//! 1. [`boxes::rewrite`] walks the top-level boxes and dispatches relevant
//!    ones to a [`boxes::BoxFilter`] by their typed path
//! 2. [`track::TrackModel::extract`] runs a read-only filter that resolves
//!    every sample's decode time, size and absolute byte offset
//! 3. [`segment::resegment`] plans new boundaries over that timeline and
//!    serializes `moof`/`mdat` pairs plus a fresh `sidx`

pub mod boxes;
pub mod codec;
pub mod error;
pub mod filters;
#[cfg(any(test, feature = "test-util"))]
pub mod fixture;
pub mod segment;
pub mod track;

pub use error::{Error, Result};
pub use segment::{resegment, IndexRange, ResegmentOptions, ResegmentOutput, SegmentPlan};
pub use track::{init_info, Fragment, IndexModel, IndexSegment, InitInfo, Sample, TrackDefaults, TrackModel};
