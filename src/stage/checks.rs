//! Assertion collection and concurrent sub-checks
//!
//! `Assertions` records every failed expectation and keeps going, so a single
//! run reports all mismatches. `CheckGroup` runs independent checks
//! concurrently and only returns once every one of them has finished.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use futures_util::future::join_all;

use crate::common::{Error, Result};

/// Collects non-fatal assertion failures
#[derive(Debug, Default)]
pub struct Assertions {
    failures: Vec<String>,
}

impl Assertions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal<T: PartialEq + Debug>(&mut self, what: &str, expected: T, actual: T) -> &mut Self {
        if expected != actual {
            self.failures.push(format!(
                "{}: expected {:?}, got {:?}",
                what, expected, actual
            ));
        }
        self
    }

    pub fn is_true(&mut self, what: &str, value: bool) -> &mut Self {
        if !value {
            self.failures.push(format!("{}: expected true", what));
        }
        self
    }

    pub fn is_false(&mut self, what: &str, value: bool) -> &mut Self {
        if value {
            self.failures.push(format!("{}: expected false", what));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn recorded failures into a single assertion error
    pub fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::TestAssertion(self.failures.join("; ")))
        }
    }
}

type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A parent grouping of checks that run concurrently
///
/// Nothing is started until [`CheckGroup::run`], which awaits every check
/// before returning. A failing check does not cancel its siblings.
#[derive(Default)]
pub struct CheckGroup<'a> {
    checks: Vec<(String, CheckFuture<'a>)>,
}

impl<'a> CheckGroup<'a> {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn add<F>(&mut self, name: impl Into<String>, check: F) -> &mut Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.checks.push((name.into(), Box::pin(check)));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run all checks and aggregate their failures
    pub async fn run(self) -> Result<()> {
        let (names, futures): (Vec<String>, Vec<CheckFuture<'a>>) = self.checks.into_iter().unzip();

        let results = join_all(futures).await;

        let mut failures = Vec::new();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => tracing::info!(check = %name, "Check passed"),
                Err(e) => {
                    tracing::error!(check = %name, error = %e, "Check failed");
                    failures.push((name, e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ChecksFailed { failures })
        }
    }
}
