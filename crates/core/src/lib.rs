//! Core building blocks of the listing enrichment pipeline.
//!
//! Everything here is independent of the concrete generator service and
//! of the process that drives the batch: the record model, the durable
//! checkpoint set, the token-stream accumulator, the generation request
//! types, and the snapshot files.

pub mod accumulator;
pub mod checkpoint;
pub mod env;
pub mod generation;
pub mod snapshot;
pub mod types;
