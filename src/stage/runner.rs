//! Stage execution
//!
//! A test is a fixed sequence of named stages. Each stage either runs to
//! completion or is skipped as a whole; a skipped stage relies on values a
//! previous invocation saved in the same working directory.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::FutureExt;

use crate::common::Result;

use super::skip::SkipDirectives;
use super::store::StageStore;

/// What happened to a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Ran,
    Skipped,
    Failed,
}

/// One line of a run report
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub name: String,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

/// Runs the stages of a single test against one working directory
#[derive(Debug)]
pub struct StageRunner {
    test_name: String,
    store: StageStore,
    skips: SkipDirectives,
    records: Mutex<Vec<StageRecord>>,
}

impl StageRunner {
    pub fn new(test_name: impl Into<String>, working_dir: &Path, skips: SkipDirectives) -> Self {
        Self {
            test_name: test_name.into(),
            store: StageStore::new(working_dir),
            skips,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Persistence handle for this test's working directory
    pub fn store(&self) -> &StageStore {
        &self.store
    }

    /// Run `body` as stage `name` unless a skip directive is set for it
    ///
    /// The skip check happens once, before the body starts. An error from the
    /// body is tagged with the stage name and returned; the caller is expected
    /// to stop the test.
    pub async fn run_stage<F, Fut>(&self, name: &str, body: F) -> Result<StageOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.skips.should_skip(name) {
            tracing::info!(test = %self.test_name, stage = name, "Skipping stage");
            self.record(name, StageOutcome::Skipped, Duration::ZERO);
            return Ok(StageOutcome::Skipped);
        }

        tracing::info!(test = %self.test_name, stage = name, "Running stage");
        let started = Instant::now();
        let result = body().await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                tracing::info!(
                    test = %self.test_name,
                    stage = name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stage complete"
                );
                self.record(name, StageOutcome::Ran, elapsed);
                Ok(StageOutcome::Ran)
            }
            Err(e) => {
                tracing::error!(test = %self.test_name, stage = name, error = %e, "Stage failed");
                self.record(name, StageOutcome::Failed, elapsed);
                Err(e.in_stage(name))
            }
        }
    }

    /// Run `body`, then always run `cleanup` as the deferred stage `cleanup_name`
    ///
    /// The deferred stage runs after the body finishes, fails or panics, and
    /// still honours its own skip directive. A body panic is resumed once
    /// cleanup is done. When both fail, the body's error is returned.
    pub async fn run_with_deferred<B, BFut, C, CFut, T>(
        &self,
        cleanup_name: &str,
        cleanup: C,
        body: B,
    ) -> Result<T>
    where
        B: FnOnce() -> BFut,
        BFut: Future<Output = Result<T>>,
        C: FnOnce() -> CFut,
        CFut: Future<Output = Result<()>>,
    {
        let body_result = AssertUnwindSafe(body()).catch_unwind().await;

        if body_result.is_err() {
            tracing::warn!(
                test = %self.test_name,
                stage = cleanup_name,
                "Test body panicked, running deferred stage"
            );
        }

        let cleanup_result = self.run_stage(cleanup_name, cleanup).await;

        match body_result {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(Err(body_err)) => {
                if let Err(cleanup_err) = cleanup_result {
                    tracing::error!(
                        test = %self.test_name,
                        error = %cleanup_err,
                        "Deferred stage also failed"
                    );
                }
                Err(body_err)
            }
            Ok(Ok(value)) => cleanup_result.map(|_| value),
        }
    }

    /// Stages seen so far, in execution order
    pub fn report(&self) -> Vec<StageRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn record(&self, name: &str, outcome: StageOutcome, elapsed: Duration) {
        if let Ok(mut records) = self.records.lock() {
            records.push(StageRecord {
                name: name.to_string(),
                outcome,
                elapsed,
            });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner(dir: &Path, skips: SkipDirectives) -> StageRunner {
        StageRunner::new("unit", dir, skips)
    }

    #[tokio::test]
    async fn stage_body_runs_and_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(tmp.path(), SkipDirectives::explicit_only());

        let outcome = runner
            .run_stage("create", || async {
                runner.store().save_string("uniqueID", "abc123")
            })
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ran);
        assert_eq!(runner.store().load_string("uniqueID").unwrap(), "abc123");
        let report = runner.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].name, "create");
    }

    #[tokio::test]
    async fn skipped_stage_body_never_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(tmp.path(), SkipDirectives::explicit_only().with_stage("apply"));
        let calls = AtomicUsize::new(0);

        let outcome = runner
            .run_stage("apply", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_stage_is_tagged() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(tmp.path(), SkipDirectives::explicit_only());

        let err = runner
            .run_stage("validate", || async {
                Err(Error::TestAssertion("namespace not active".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StageFailed { ref stage, .. } if stage == "validate"));
        assert_eq!(runner.report()[0].outcome, StageOutcome::Failed);
    }
}
