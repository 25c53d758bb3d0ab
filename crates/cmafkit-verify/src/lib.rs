//! cmafkit-verify: DASH-OnDemand conformance checks.
//!
//! For each manifest, every audio and video representation is extracted
//! into a [`cmafkit_media::TrackModel`], and its fragment timeline is
//! compared with its own `sidx` and with the other representations of the
//! same adaptation set. Findings are folded into a [`Badness`] bitmask per
//! asset; an empty mask means the asset is conformant.
//!
//! ```no_run
//! use std::path::Path;
//! use cmafkit_verify::{Verifier, VerifyOptions};
//!
//! let report = Verifier::new(VerifyOptions::default()).check_asset(Path::new("asset/manifest.mpd"));
//! println!("{}", report.summary());
//! ```

pub mod badness;
pub mod checks;
pub mod error;
pub mod manifest;
pub mod timeline;
pub mod verifier;

pub use badness::Badness;
pub use checks::Tolerances;
pub use error::{Result, VerifyError};
pub use manifest::{MediaType, Mpd, TrackGroup};
pub use timeline::{SegmentTiming, Timeline};
pub use verifier::{AssetReport, FsSource, MemorySource, TrackSource, Verifier, VerifyOptions};
