//! Weir orchestrator
//!
//! Generates pipeline executions from user actions and provider webhooks,
//! runs them on a Jenkins-like CI backend and keeps their status in sync.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;
