//! cmafkit - Resegment and verify fragmented CMAF / DASH-OnDemand tracks
//!
//! This library crate exposes the driver glue for integration testing. The
//! media work lives in `cmafkit-media` and `cmafkit-verify`.

pub mod backup;
pub mod batch;
pub mod config;
