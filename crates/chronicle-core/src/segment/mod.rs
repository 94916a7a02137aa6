//! Scene segmentation.
//!
//! Splits a server's chronologically ordered message archive into scenes:
//! contiguous runs of activity in one location.
//!
//! - [`engine::SegmentationEngine`] walks the stream once, keeps one scene
//!   open at a time, and defers messages from other locations to a backlog.
//! - [`backlog::BacklogReconciler`] re-buckets the deferred messages in
//!   repeated passes whenever the engine splits and at end of stream.
//! - [`pacer::Pacer`] hands control back to the scheduler periodically.

pub mod backlog;
pub mod engine;
pub mod pacer;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use backlog::{Backlog, BacklogReconciler};
pub use engine::SegmentationEngine;
pub use pacer::Pacer;
pub use state::{Flow, GroupIds, Halt, SceneCursor};
