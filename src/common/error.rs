//! Error types for the staged test harness
//!
//! Messages name the stage, key or command involved and, where a common
//! mistake is likely, hint at how to recover.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Stage Errors ===
    #[error(
        "No saved value '{key}' at {}. Was a stage that produces it skipped before it ever ran?",
        .path.display()
    )]
    StageValueMissing { key: String, path: PathBuf },

    #[error("Saved value '{key}' at {} is unreadable: {error}", .path.display())]
    StageValueCorrupt {
        key: String,
        path: PathBuf,
        error: String,
    },

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    // === Tool Errors ===
    #[error("Tool '{name}' not found. Searched: {searched}")]
    ToolNotFound { name: String, searched: String },

    #[error("Failed to execute '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Command '{command}' exited with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output from '{command}': {reason}")]
    UnexpectedOutput { command: String, reason: String },

    #[error("Terraform output '{name}' {reason}")]
    TerraformOutput { name: String, reason: String },

    #[error("Terraform variable '{name}' {reason}")]
    TerraformVar { name: String, reason: String },

    // === Template Errors ===
    #[error("Template '{name}': {reason}")]
    Template { name: String, reason: String },

    // === Timeout Errors ===
    #[error("{what} not ready after {attempts} attempts")]
    RetriesExhausted { what: String, attempts: u32 },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    #[error("{} check(s) failed:\n{}", .failures.len(), format_failures(.failures))]
    ChecksFailed { failures: Vec<(String, String)> },

    #[error("{failed} of {total} scenario(s) failed")]
    ScenariosFailed { failed: usize, total: usize },
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, message)| format!("  {}: {}", name, message))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Create a tool not found error with search locations
    pub fn tool_not_found<S: AsRef<str>>(name: &str, searched: &[S]) -> Self {
        Self::ToolNotFound {
            name: name.to_string(),
            searched: searched
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Tag an error with the stage it was raised in
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            // Nested stages keep the innermost name
            e @ Error::StageFailed { .. } => e,
            e => Error::StageFailed {
                stage: stage.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// Create an unexpected output error
    pub fn unexpected_output(command: &str, reason: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a template error
    pub fn template(name: &str, reason: impl Into<String>) -> Self {
        Self::Template {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by a missing persisted value
    pub fn is_missing_value(&self) -> bool {
        match self {
            Error::StageValueMissing { .. } => true,
            Error::StageFailed { source, .. } => source.is_missing_value(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tag_keeps_innermost_stage() {
        let err = Error::TestAssertion("boom".into())
            .in_stage("validate")
            .in_stage("outer");
        assert!(matches!(err, Error::StageFailed { ref stage, .. } if stage == "validate"));
    }

    #[test]
    fn missing_value_is_detected_through_stage_wrapper() {
        let err = Error::StageValueMissing {
            key: "uniqueID".into(),
            path: PathBuf::from("stages/x/.test-data/uniqueID.json"),
        }
        .in_stage("create_terraform_options");
        assert!(err.is_missing_value());
    }

    #[test]
    fn checks_failed_lists_every_failure() {
        let err = Error::ChecksFailed {
            failures: vec![
                ("namespace".into(), "phase mismatch".into()),
                ("rbac-read-only".into(), "could create pods".into()),
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("2 check(s) failed"));
        assert!(message.contains("rbac-read-only: could create pods"));
    }
}
