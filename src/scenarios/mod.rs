//! The bundled test scenarios
//!
//! Each scenario is a fixed sequence of stages run against its own working
//! directory under the configured stages dir. Stage names double as the
//! suffix of their `SKIP_<stage>` environment variable.

pub mod namespace;
pub mod options;
pub mod tiller;
pub mod tiller_kubergrunt;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use serde::Serialize;

use crate::common::{paths, Result};
use crate::stage::{SkipDirectives, StageRecord, StageRunner};
use crate::tools::Toolbox;

pub const CREATE_TEST_COPY: &str = "create_test_copy_of_examples";
pub const CREATE_TEST_SERVICE_ACCOUNT: &str = "create_test_service_account";
pub const CREATE_TERRAFORM_OPTIONS: &str = "create_terraform_options";
pub const TERRAFORM_APPLY: &str = "terraform_apply";
pub const SETUP_HELM_CLIENT: &str = "setup_helm_client";
pub const VALIDATE: &str = "validate";
pub const VALIDATE_UPGRADE: &str = "validate_upgrade";
/// Deferred stage that tears down whatever `terraform_apply` created
pub const CLEANUP: &str = "cleanup";

/// Keys of values scenarios persist between stages
pub mod keys {
    pub const MODULE_PATH: &str = "modulePath";
    pub const UNIQUE_ID: &str = "uniqueID";
    pub const HELM_HOME: &str = "helmHome";
    pub const TMP_KUBECONFIG: &str = "tmpKubectlConfigPath";
    pub const TEST_SERVICE_ACCOUNT_NAME: &str = "testServiceAccountName";
    pub const TEST_SERVICE_ACCOUNT_NAMESPACE: &str = "testServiceAccountNamespace";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Namespace with RBAC roles and service accounts, validated against the cluster
    NamespaceWithServiceAccount,
    /// Namespace module with resource creation disabled, plan only
    NamespaceWithServiceAccountNoCreate,
    /// Tiller deployment set up and exercised with kubergrunt
    Tiller,
    /// Tiller deployment on a machine without kubergrunt
    TillerNoKubergrunt,
    /// Tiller deployed by kubergrunt, used through a test service account
    TillerKubergrunt,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::NamespaceWithServiceAccount,
        Scenario::NamespaceWithServiceAccountNoCreate,
        Scenario::Tiller,
        Scenario::TillerNoKubergrunt,
        Scenario::TillerKubergrunt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::NamespaceWithServiceAccount => "namespace-with-service-account",
            Scenario::NamespaceWithServiceAccountNoCreate => {
                "namespace-with-service-account-no-create"
            }
            Scenario::Tiller => "tiller",
            Scenario::TillerNoKubergrunt => "tiller-no-kubergrunt",
            Scenario::TillerKubergrunt => "tiller-kubergrunt",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::NamespaceWithServiceAccount => {
                "Apply the namespace module and verify namespace state and RBAC access"
            }
            Scenario::NamespaceWithServiceAccountNoCreate => {
                "Plan the namespace module with create_resources = 0"
            }
            Scenario::Tiller => "Deploy Tiller, configure helm with kubergrunt, install a chart",
            Scenario::TillerNoKubergrunt => "Deploy Tiller without kubergrunt installed",
            Scenario::TillerKubergrunt => {
                "Deploy Tiller with kubergrunt, install and upgrade as a test service account"
            }
        }
    }

    /// Stages in the order they run, excluding the deferred cleanup
    pub fn stages(&self) -> &'static [&'static str] {
        match self {
            Scenario::NamespaceWithServiceAccount => &[
                CREATE_TEST_COPY,
                CREATE_TERRAFORM_OPTIONS,
                TERRAFORM_APPLY,
                VALIDATE,
            ],
            Scenario::NamespaceWithServiceAccountNoCreate | Scenario::TillerNoKubergrunt => {
                &[CREATE_TEST_COPY, CREATE_TERRAFORM_OPTIONS, TERRAFORM_APPLY]
            }
            Scenario::Tiller => &[
                CREATE_TEST_COPY,
                CREATE_TERRAFORM_OPTIONS,
                TERRAFORM_APPLY,
                SETUP_HELM_CLIENT,
                VALIDATE,
            ],
            Scenario::TillerKubergrunt => &[
                CREATE_TEST_COPY,
                CREATE_TEST_SERVICE_ACCOUNT,
                CREATE_TERRAFORM_OPTIONS,
                TERRAFORM_APPLY,
                VALIDATE,
                VALIDATE_UPGRADE,
            ],
        }
    }

    /// The deferred stage, run after the others whatever their outcome
    pub fn deferred_stage(&self) -> &'static str {
        CLEANUP
    }

    /// Stage after which the deferred stage is registered
    ///
    /// Failures before this point leave nothing to clean up.
    pub fn deferred_after(&self) -> &'static str {
        CREATE_TERRAFORM_OPTIONS
    }

    /// Working directory this scenario persists its values in
    pub fn working_dir(&self, stages_dir: &Path) -> PathBuf {
        paths::working_dir(stages_dir, self.name())
    }

    /// Reason to not run this scenario on the current machine
    pub async fn skip_reason(&self, toolbox: &Toolbox) -> Option<String> {
        match self {
            Scenario::TillerNoKubergrunt if toolbox.kubergrunt_installed().await => {
                Some("kubergrunt is installed".to_string())
            }
            _ => None,
        }
    }

    /// Run every stage of the scenario
    pub async fn run(self, toolbox: &Toolbox, skips: SkipDirectives) -> ScenarioResult {
        let started = Instant::now();
        let working_dir = self.working_dir(&toolbox.config().paths.stages_dir);

        if let Some(reason) = self.skip_reason(toolbox).await {
            tracing::info!(scenario = self.name(), %reason, "Skipping scenario");
            return ScenarioResult {
                scenario: self,
                working_dir,
                status: ScenarioStatus::Skipped(reason),
                stages: Vec::new(),
                elapsed: started.elapsed(),
            };
        }

        let runner = StageRunner::new(self.name(), &working_dir, skips);
        let result = self.run_stages(toolbox, &runner).await;

        let status = match result {
            Ok(()) => ScenarioStatus::Passed,
            Err(e) => ScenarioStatus::Failed(e.to_string()),
        };

        ScenarioResult {
            scenario: self,
            working_dir,
            status,
            stages: runner.report(),
            elapsed: started.elapsed(),
        }
    }

    async fn run_stages(self, toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
        match self {
            Scenario::NamespaceWithServiceAccount => namespace::run(toolbox, runner).await,
            Scenario::NamespaceWithServiceAccountNoCreate => {
                namespace::run_no_create(toolbox, runner).await
            }
            Scenario::Tiller => tiller::run(toolbox, runner).await,
            Scenario::TillerNoKubergrunt => tiller::run_no_kubergrunt(toolbox, runner).await,
            Scenario::TillerKubergrunt => tiller_kubergrunt::run(toolbox, runner).await,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioStatus {
    Passed,
    Skipped(String),
    Failed(String),
}

/// Result of a scenario run
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub working_dir: PathBuf,
    pub status: ScenarioStatus,
    pub stages: Vec<StageRecord>,
    pub elapsed: Duration,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        !matches!(self.status, ScenarioStatus::Failed(_))
    }
}

/// Stage: init and apply the saved terraform options
pub(crate) async fn terraform_apply(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let options = runner.store().load_terraform_options()?;
    toolbox.terraform()?.init_and_apply(&options).await?;
    Ok(())
}

/// Stage: destroy whatever the saved terraform options describe
pub(crate) async fn terraform_destroy(toolbox: &Toolbox, runner: &StageRunner) -> Result<()> {
    let options = runner.store().load_terraform_options()?;
    toolbox.terraform()?.destroy(&options).await?;
    Ok(())
}

/// Copy `subfolder` of the module repository and record where the copy lives
pub(crate) fn copy_module(
    toolbox: &Toolbox,
    runner: &StageRunner,
    subfolder: &str,
) -> Result<PathBuf> {
    let module_path = toolbox.copy_module_to_temp(Path::new(subfolder))?;
    tracing::info!(
        scenario = runner.test_name(),
        path = %module_path.display(),
        "Path to test folder"
    );
    runner.store().save_value(keys::MODULE_PATH, &module_path)?;
    Ok(module_path)
}

/// Create the helm home inside a module copy and record it
pub(crate) fn create_helm_home(runner: &StageRunner, module_path: &Path) -> Result<PathBuf> {
    let helm_home = module_path.join(".helm");
    paths::create_private_dir(&helm_home)?;
    runner.store().save_value(keys::HELM_HOME, &helm_home)?;
    Ok(helm_home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_clap() {
        for scenario in Scenario::ALL {
            let parsed = Scenario::from_str(scenario.name(), false).unwrap();
            assert_eq!(parsed, scenario);
        }
    }

    #[test]
    fn every_scenario_applies_after_creating_options() {
        for scenario in Scenario::ALL {
            let stages = scenario.stages();
            let options = stages.iter().position(|s| *s == CREATE_TERRAFORM_OPTIONS);
            let apply = stages.iter().position(|s| *s == TERRAFORM_APPLY);
            assert!(options.is_some() && options < apply, "{}", scenario);
            assert!(!stages.contains(&CLEANUP));
        }
    }

    #[test]
    fn working_dirs_do_not_collide() {
        let dirs: std::collections::BTreeSet<_> = Scenario::ALL
            .iter()
            .map(|s| s.working_dir(Path::new("stages")))
            .collect();
        assert_eq!(dirs.len(), Scenario::ALL.len());
    }
}
