//! Data Transfer Objects
//!
//! Request and response bodies of the orchestrator HTTP surface.

pub mod execution;
pub mod pipeline;
pub mod source_code;
