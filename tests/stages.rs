//! Library-level tests of staged execution
//!
//! Exercise the runner, value store and check grouping the way a scenario
//! does, without any external tools.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kubestage::stage::{CheckGroup, StageOutcome};
use kubestage::tools::terraform::TerraformOptions;
use kubestage::{Error, SkipDirectives, StageRunner};
use pretty_assertions::assert_eq;
use serde_json::json;

fn runner(dir: &std::path::Path, skips: SkipDirectives) -> StageRunner {
    StageRunner::new("stages-test", dir, skips)
}

#[tokio::test]
async fn test_values_survive_into_a_later_invocation() {
    let tmp = tempfile::tempdir().unwrap();
    let options = TerraformOptions::new("/tmp/module")
        .with_var("name", "abc123")
        .with_var("tls_subject", json!({"common_name": "tiller", "org": "gruntwork"}));

    let first = runner(tmp.path(), SkipDirectives::explicit_only());
    first
        .run_stage("create_terraform_options", || async {
            first.store().save_string("uniqueID", "AbC123")?;
            first.store().save_terraform_options(&options)
        })
        .await
        .unwrap();

    // A fresh runner over the same directory, with the producing stage skipped
    let second = runner(
        tmp.path(),
        SkipDirectives::explicit_only().with_stage("create_terraform_options"),
    );
    let loaded = Mutex::new(None);
    let reruns = AtomicUsize::new(0);
    let outcome = second
        .run_stage("create_terraform_options", || async {
            reruns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(outcome, StageOutcome::Skipped);
    assert_eq!(reruns.load(Ordering::SeqCst), 0);

    second
        .run_stage("terraform_apply", || async {
            *loaded.lock().unwrap() = Some(second.store().load_terraform_options()?);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(loaded.into_inner().unwrap(), Some(options));
    assert_eq!(second.store().load_string("uniqueID").unwrap(), "AbC123");
}

#[tokio::test]
async fn test_skipping_without_prior_run_fails_fast() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = runner(
        tmp.path(),
        SkipDirectives::explicit_only().with_stage("create_test_copy_of_examples"),
    );

    runner
        .run_stage("create_test_copy_of_examples", || async { Ok(()) })
        .await
        .unwrap();

    let err = runner
        .run_stage("create_terraform_options", || async {
            let _path: PathBuf = runner.store().load_value("modulePath")?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(err.is_missing_value());
    assert!(err.to_string().contains("create_terraform_options"));
}

#[tokio::test]
async fn test_deferred_stage_runs_after_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = runner(tmp.path(), SkipDirectives::explicit_only());
    let cleanups = AtomicUsize::new(0);

    let result: kubestage::Result<()> = runner
        .run_with_deferred(
            "cleanup",
            || async {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || async {
                runner
                    .run_stage("terraform_apply", || async {
                        Err(Error::TestAssertion("apply failed".into()))
                    })
                    .await
                    .map(|_| ())
            },
        )
        .await;

    assert!(matches!(result, Err(Error::StageFailed { ref stage, .. }) if stage == "terraform_apply"));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    let names: Vec<_> = runner.report().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["terraform_apply", "cleanup"]);
}

#[tokio::test]
async fn test_body_error_wins_over_cleanup_error() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = runner(tmp.path(), SkipDirectives::explicit_only());

    let result: kubestage::Result<()> = runner
        .run_with_deferred(
            "cleanup",
            || async { Err(Error::TestAssertion("destroy failed".into())) },
            || async { Err(Error::TestAssertion("validate failed".into())) },
        )
        .await;

    assert!(matches!(result, Err(Error::TestAssertion(ref m)) if m == "validate failed"));
}

#[tokio::test]
async fn test_deferred_stage_runs_after_panic() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().to_path_buf();

    let handle = tokio::spawn(async move {
        let runner = runner(&path, SkipDirectives::explicit_only());
        let _: kubestage::Result<()> = runner
            .run_with_deferred(
                "cleanup",
                || async { runner.store().save_string("cleaned", "yes") },
                || async {
                    if validation_panics() {
                        panic!("validate panicked");
                    }
                    Ok(())
                },
            )
            .await;
    });

    let joined = handle.await;
    assert!(joined.unwrap_err().is_panic());

    let store = kubestage::StageStore::new(tmp.path());
    assert_eq!(store.load_string("cleaned").unwrap(), "yes");
}

fn validation_panics() -> bool {
    true
}

#[tokio::test]
async fn test_skipped_deferred_stage_does_not_run() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = runner(tmp.path(), SkipDirectives::explicit_only().with_stage("cleanup"));
    let cleanups = AtomicUsize::new(0);

    let value = runner
        .run_with_deferred(
            "cleanup",
            || async {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || async { Ok(42) },
        )
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    assert_eq!(runner.report()[0].outcome, StageOutcome::Skipped);
}

#[tokio::test]
async fn test_checks_finish_before_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = runner(tmp.path(), SkipDirectives::explicit_only());
    let events = Mutex::new(Vec::new());

    let result: kubestage::Result<()> = runner
        .run_with_deferred(
            "cleanup",
            || async {
                events.lock().unwrap().push("cleanup");
                Ok(())
            },
            || async {
                runner
                    .run_stage("validate", || async {
                        let mut group = CheckGroup::new();
                        group
                            .add("slow", async {
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                events.lock().unwrap().push("slow");
                                Ok(())
                            })
                            .add("failing", async {
                                events.lock().unwrap().push("failing");
                                Err(Error::TestAssertion("read-only could create pods".into()))
                            });
                        group.run().await
                    })
                    .await
                    .map(|_| ())
            },
        )
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("1 check(s) failed"));
    assert_eq!(
        events.into_inner().unwrap(),
        vec!["failing", "slow", "cleanup"]
    );
}

#[test]
fn test_env_directive_is_read_per_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = "stages_test_env_directive";
    let skips = SkipDirectives::from_env();

    assert!(!skips.should_skip(stage));
    std::env::set_var(format!("SKIP_{}", stage), "true");
    assert!(skips.should_skip(stage));
    std::env::set_var(format!("SKIP_{}", stage), "");
    assert!(!skips.should_skip(stage));
    std::env::remove_var(format!("SKIP_{}", stage));

    // The runner takes the directives by value; the store is independent of them
    let runner = runner(tmp.path(), skips);
    assert!(runner.store().saved_keys().unwrap().is_empty());
}
