//! kubergrunt invocation
//!
//! Only the `helm` subcommands the Tiller scenarios need are wrapped.

use std::path::{Path, PathBuf};

use crate::common::Result;

use super::kubectl::KubectlOptions;
use super::shell::ShellCommand;

#[derive(Debug, Clone)]
pub struct Kubergrunt {
    binary: PathBuf,
}

impl Kubergrunt {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn connection_args(options: &KubectlOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(context) = options.context_name.as_deref().filter(|c| !c.is_empty()) {
            args.push("--kubectl-context-name".to_string());
            args.push(context.to_string());
        }
        if let Some(config) = &options.config_path {
            args.push("--kubeconfig".to_string());
            args.push(config.display().to_string());
        }
        args
    }

    pub fn wait_for_tiller_command(
        &self,
        options: &KubectlOptions,
        tiller_namespace: &str,
        tiller_version: &str,
    ) -> ShellCommand {
        ShellCommand::new(&self.binary)
            .args([
                "helm",
                "wait-for-tiller",
                "--tiller-namespace",
                tiller_namespace,
                "--expected-tiller-version",
                tiller_version,
            ])
            .args(Self::connection_args(options))
    }

    /// Block until Tiller in `tiller_namespace` runs `tiller_version`
    pub async fn wait_for_tiller(
        &self,
        options: &KubectlOptions,
        tiller_namespace: &str,
        tiller_version: &str,
    ) -> Result<()> {
        self.wait_for_tiller_command(options, tiller_namespace, tiller_version)
            .run()
            .await
    }

    pub fn configure_command(
        &self,
        options: &KubectlOptions,
        helm_home: &Path,
        tiller_namespace: &str,
        resource_namespace: &str,
        rbac_user: &str,
    ) -> ShellCommand {
        ShellCommand::new(&self.binary)
            .args(["helm", "configure", "--helm-home"])
            .arg(helm_home)
            .args([
                "--tiller-namespace",
                tiller_namespace,
                "--resource-namespace",
                resource_namespace,
                "--rbac-user",
                rbac_user,
            ])
            .args(Self::connection_args(options))
    }

    /// Write a helm client configuration for the deployed Tiller into `helm_home`
    pub async fn configure(
        &self,
        options: &KubectlOptions,
        helm_home: &Path,
        tiller_namespace: &str,
        resource_namespace: &str,
        rbac_user: &str,
    ) -> Result<()> {
        self.configure_command(
            options,
            helm_home,
            tiller_namespace,
            resource_namespace,
            rbac_user,
        )
        .run()
        .await
    }

    /// Whether `kubergrunt version` runs successfully
    pub async fn is_installed(&self) -> bool {
        ShellCommand::new(&self.binary)
            .arg("version")
            .run()
            .await
            .is_ok()
    }
}
