//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between the store, the CI engine and the remote
//! providers, and contain the domain logic.

pub mod execution;
pub mod pipeline;
pub mod source_code;

// Re-export for convenience
pub use execution as execution_service;
pub use pipeline as pipeline_service;
pub use source_code as source_code_service;
