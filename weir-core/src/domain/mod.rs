//! Core domain types
//!
//! These types represent the resources the orchestrator persists and the
//! CI engine reads. They are plain data with a few pure state transitions;
//! persistence lives in the orchestrator.

pub mod execution;
pub mod meta;
pub mod pipeline;
pub mod secret;
pub mod source_code;
pub mod state;
