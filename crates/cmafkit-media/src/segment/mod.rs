//! Resegmentation: plan new segment boundaries and write them out.

mod plan;
mod writer;

pub use plan::{plan_segments, SegmentPlan};
pub use writer::{resegment, IndexRange, ResegmentOptions, ResegmentOutput};
