//! Logging and tracing configuration
//!
//! Tool invocations and stage transitions are logged through `tracing`.
//! A run can additionally mirror everything to a log file.

use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is unset
fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("kubestage=debug,info")
    } else {
        EnvFilter::new("kubestage=info,warn")
    }
}

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for dependencies.
pub fn init_cli(verbose: bool, log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    // File logging with full details
    let file_layer = log_file.and_then(|path| {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            ),
            Err(e) => {
                eprintln!("Warning: Could not open log file: {}", e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    // Installs the global subscriber, so this is the only test that may call `init_cli`
    #[test]
    fn log_file_receives_events_alongside_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kubestage.log");

        init_cli(true, Some(&path));
        tracing::error!(stage = "terraform_apply", "Stage failed");

        let logged = std::fs::read_to_string(&path).unwrap();
        assert!(logged.contains("Stage failed"), "log file: {}", logged);
        assert!(logged.contains("terraform_apply"));
    }
}
