//! Weir Core
//!
//! Core types and abstractions for the Weir pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: pipelines, executions and their status tree, source-code
//!   credentials and repositories, secrets
//! - Build environment helpers: the `CICD_*` variables and image tag parsing
//! - DTOs: request/response bodies shared by the HTTP surface

pub mod domain;
pub mod dto;
pub mod env;
pub mod image;
