//! Shared population report pipeline primitives.
//!
//! This crate owns the deterministic parts of the pipeline: configuration,
//! notification and response contracts, dataset parsing, report computation
//! and the queue delivery model. It intentionally excludes AWS SDK and Lambda
//! runtime concerns, which live in `pipeline_lambda`.

pub mod config;
pub mod contract;
pub mod dataset;
pub mod delivery;
pub mod error;
pub mod notification;
pub mod report;
pub mod storage_keys;

pub use error::{FailureClass, PipelineError};
