//! AWS-oriented adapters and handlers for the population report pipeline.
//!
//! This crate owns runtime integration details (Lambda handlers, S3 and SQS
//! adapters, HTTP upstream access, invocation budgets) on top of the pure
//! primitives in `pipeline_core`.

pub mod adapters;
pub mod budget;
pub mod handlers;
pub mod local;
pub mod telemetry;
