//! Common utilities shared between the CLI and the scenarios

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
