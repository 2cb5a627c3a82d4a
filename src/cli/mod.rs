//! CLI command handling
//!
//! Dispatches CLI commands and formats their output.

use std::collections::BTreeSet;
use std::sync::Arc;

use colored::Colorize;
use tokio::task::JoinSet;

use crate::commands::{Commands, GlobalArgs};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::scenarios::{Scenario, ScenarioResult, ScenarioStatus};
use crate::stage::{SkipDirectives, StageOutcome, StageStore};
use crate::tools::Toolbox;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, global: &GlobalArgs) -> Result<()> {
    match command {
        Commands::Run {
            scenarios,
            all,
            skip,
            repo_root,
        } => {
            let mut config = load_config(global)?;
            if let Some(root) = repo_root {
                config.paths.repo_root = root;
            }

            let skips = SkipDirectives::from_env().with_stages(skip);
            let results = run_scenarios(config, selected(scenarios, all), skips).await;

            let failed = results.iter().filter(|r| !r.passed()).count();
            print_summary(&results);

            if failed > 0 {
                return Err(Error::ScenariosFailed {
                    failed,
                    total: results.len(),
                });
            }
            Ok(())
        }

        Commands::List { json } => {
            if json {
                let listing: Vec<_> = Scenario::ALL
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "name": s,
                            "description": s.description(),
                            "stages": s.stages(),
                            "deferred": s.deferred_stage(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for scenario in Scenario::ALL {
                    println!("{:<42} {}", scenario.name(), scenario.description().dimmed());
                }
            }
            Ok(())
        }

        Commands::Show { scenario } => {
            let config = load_config(global)?;
            let working_dir = scenario.working_dir(&config.paths.stages_dir);
            let store = StageStore::new(&working_dir);
            let skips = SkipDirectives::from_env();

            println!("{} {}", "Scenario:".blue().bold(), scenario.name().white().bold());
            println!("  {}", scenario.description().dimmed());
            println!("  Working dir: {}", working_dir.display());

            println!("\n{}", "Stages:".cyan());
            for stage in scenario.stages() {
                print_planned_stage(stage, false, &skips);
                if *stage == scenario.deferred_after() {
                    print_planned_stage(scenario.deferred_stage(), true, &skips);
                }
            }

            let keys = store.saved_keys()?;
            println!("\n{}", "Saved values:".cyan());
            if keys.is_empty() {
                println!("  {}", "none".dimmed());
            }
            for key in keys {
                let value: serde_json::Value = store.load_value(&key)?;
                println!("  {} = {}", key, value.to_string().dimmed());
            }
            Ok(())
        }

        Commands::Clean { scenarios, all } => {
            let config = load_config(global)?;
            for scenario in selected(scenarios, all) {
                let working_dir = scenario.working_dir(&config.paths.stages_dir);
                StageStore::new(&working_dir).clean()?;
                println!("Cleaned {} ({})", scenario.name(), working_dir.display());
            }
            Ok(())
        }
    }
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = match &global.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(stages_dir) = &global.stages_dir {
        config.paths.stages_dir = stages_dir.clone();
    }
    Ok(config)
}

/// Requested scenarios in canonical order, without duplicates
fn selected(scenarios: Vec<Scenario>, all: bool) -> Vec<Scenario> {
    if all {
        return Scenario::ALL.to_vec();
    }
    scenarios
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run scenarios in parallel, printing each result as it completes
async fn run_scenarios(
    config: Config,
    scenarios: Vec<Scenario>,
    skips: SkipDirectives,
) -> Vec<ScenarioResult> {
    let toolbox = Arc::new(Toolbox::new(config));
    let mut set = JoinSet::new();

    for scenario in scenarios.iter().copied() {
        let toolbox = Arc::clone(&toolbox);
        let skips = skips.clone();
        println!("{} {}", "Running Scenario:".blue().bold(), scenario.name().white().bold());
        set.spawn(async move { scenario.run(&toolbox, skips).await });
    }

    let mut results = Vec::with_capacity(scenarios.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => {
                print_result(&result);
                results.push(result);
            }
            Err(e) => {
                // A panicking scenario loses its result; the others keep running
                tracing::error!(error = %e, "Scenario task did not complete");
                eprintln!("{} scenario task aborted: {}", "✗".red(), e);
            }
        }
    }

    // Panicked tasks are reported as failures against whichever scenario is missing
    let finished: BTreeSet<_> = results.iter().map(|r| r.scenario).collect();
    for scenario in scenarios {
        if !finished.contains(&scenario) {
            let working_dir = scenario.working_dir(&toolbox.config().paths.stages_dir);
            results.push(ScenarioResult {
                scenario,
                working_dir,
                status: ScenarioStatus::Failed("scenario panicked".to_string()),
                stages: Vec::new(),
                elapsed: Default::default(),
            });
        }
    }

    results.sort_by_key(|r| r.scenario);
    results
}

fn print_planned_stage(stage: &str, deferred: bool, skips: &SkipDirectives) {
    let label = if deferred {
        format!("{} {}", stage, "(deferred)".dimmed())
    } else {
        stage.to_string()
    };
    if skips.should_skip(stage) {
        println!("  {} {} {}", "-".yellow(), label, "(skip set)".yellow());
    } else {
        println!("  {} {}", "·".dimmed(), label);
    }
}

fn print_result(result: &ScenarioResult) {
    println!("\n{} {}", "Scenario:".blue().bold(), result.scenario.name().white().bold());

    for record in &result.stages {
        let elapsed = format!("({:.1}s)", record.elapsed.as_secs_f64());
        match record.outcome {
            StageOutcome::Ran => {
                println!("  {} {} {}", "✓".green(), record.name, elapsed.dimmed())
            }
            StageOutcome::Skipped => {
                println!("  {} {} {}", "-".yellow(), record.name, "(skipped)".yellow())
            }
            StageOutcome::Failed => {
                println!("  {} {} {}", "✗".red(), record.name, elapsed.dimmed())
            }
        }
    }

    match &result.status {
        ScenarioStatus::Passed => println!("{} {}", "✓".green().bold(), "Passed".green().bold()),
        ScenarioStatus::Skipped(reason) => {
            println!("{} {}", "Skipped:".yellow().bold(), reason)
        }
        ScenarioStatus::Failed(error) => {
            println!("{} {}", "✗".red().bold(), "Failed".red().bold());
            for line in error.lines() {
                println!("  {}", line.red());
            }
        }
    }
}

fn print_summary(results: &[ScenarioResult]) {
    let passed = results
        .iter()
        .filter(|r| r.status == ScenarioStatus::Passed)
        .count();
    let skipped = results
        .iter()
        .filter(|r| matches!(r.status, ScenarioStatus::Skipped(_)))
        .count();
    let failed = results.len() - passed - skipped;

    println!("\n{}", "Summary:".cyan());
    for result in results {
        let mark = match result.status {
            ScenarioStatus::Passed => "✓".green(),
            ScenarioStatus::Skipped(_) => "-".yellow(),
            ScenarioStatus::Failed(_) => "✗".red(),
        };
        println!(
            "  {} {} {}",
            mark,
            result.scenario.name(),
            format!("({:.1}s)", result.elapsed.as_secs_f64()).dimmed()
        );
    }
    println!(
        "{} passed, {} skipped, {} failed",
        passed.to_string().green(),
        skipped.to_string().yellow(),
        failed.to_string().red()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_ordered_and_deduplicated() {
        let picked = selected(
            vec![
                Scenario::TillerKubergrunt,
                Scenario::NamespaceWithServiceAccount,
                Scenario::TillerKubergrunt,
            ],
            false,
        );
        assert_eq!(
            picked,
            vec![Scenario::NamespaceWithServiceAccount, Scenario::TillerKubergrunt]
        );
        assert_eq!(selected(Vec::new(), true).len(), Scenario::ALL.len());
    }

    #[test]
    fn stages_dir_flag_overrides_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[paths]\nstages_dir = \"from-file\"\n").unwrap();

        let global = GlobalArgs {
            config: Some(config_path.clone()),
            ..GlobalArgs::default()
        };
        assert_eq!(
            load_config(&global).unwrap().paths.stages_dir,
            std::path::PathBuf::from("from-file")
        );

        let global = GlobalArgs {
            config: Some(config_path),
            stages_dir: Some(tmp.path().join("override")),
            ..GlobalArgs::default()
        };
        assert_eq!(
            load_config(&global).unwrap().paths.stages_dir,
            tmp.path().join("override")
        );
    }
}
