//! kubestage - staged, resumable integration tests for Kubernetes modules
//!
//! A test is a fixed sequence of named stages. Stages persist what they
//! produce in a per-test working directory, so any of them can be skipped on
//! a later run and the rest pick up the saved values. External tools
//! (terraform, kubectl, helm, kubergrunt) are driven as subprocesses.

pub mod access;
pub mod cli;
pub mod commands;
pub mod common;
pub mod scenarios;
pub mod stage;
pub mod template;
pub mod tools;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use stage::{SkipDirectives, StageRunner, StageStore};
