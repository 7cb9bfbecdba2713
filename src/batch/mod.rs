//! Batch assembly and job attribution.

pub mod assign;
pub mod batcher;

pub use assign::{assign_containers, empty_containers};
pub use batcher::{Batch, BatchPlan, create_streaming_batches};
