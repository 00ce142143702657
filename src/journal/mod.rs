//! Incremental day journal: segmentation, event storage, chunk tracking and
//! daily reflection.
//!
//! Everything is partitioned by the `(username, day)` value pair. Storage
//! functions take a `&Connection` (or `&mut Connection` when they need their
//! own transaction) so callers decide the transaction boundary.

pub mod events;
pub mod orchestrator;
pub mod processor;
pub mod reflection;
pub mod segmentation;
pub mod stats;
pub mod status;
pub mod transcript;
pub mod types;

pub use orchestrator::{DayView, IngestOutcome, IngestRequest, IngestStatus, Orchestrator};
pub use segmentation::SegmentationEngine;
