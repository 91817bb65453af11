//! Scheduler Module
//!
//! Background reconciliation of executions with the CI backend.

pub mod syncer;

pub use syncer::ExecutionSyncer;
