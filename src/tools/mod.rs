//! Wrappers around the external tools a scenario drives
//!
//! The harness never reimplements terraform, kubectl, helm or kubergrunt; it
//! shells out to them and parses what they print.

pub mod files;
pub mod helm;
pub mod kubectl;
pub mod kubergrunt;
pub mod shell;
pub mod terraform;

use std::path::{Path, PathBuf};

use crate::common::config::{Config, Tool};
use crate::common::Result;

use helm::Helm;
use kubectl::{Kubectl, KubectlOptions};
use kubergrunt::Kubergrunt;
use terraform::Terraform;

/// Resolved tool executables
///
/// Lookup is lazy: a scenario that never calls helm does not need it on PATH.
#[derive(Debug, Clone)]
pub struct Toolbox {
    config: Config,
}

impl Toolbox {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn terraform(&self) -> Result<Terraform> {
        Ok(Terraform::new(self.config.tool_path(Tool::Terraform)?))
    }

    pub fn kubectl(&self, options: KubectlOptions) -> Result<Kubectl> {
        Ok(Kubectl::new(self.config.tool_path(Tool::Kubectl)?, options))
    }

    pub fn helm(&self, helm_home: impl Into<PathBuf>) -> Result<Helm> {
        Ok(Helm::new(self.config.tool_path(Tool::Helm)?, helm_home))
    }

    pub fn kubergrunt(&self) -> Result<Kubergrunt> {
        Ok(Kubergrunt::new(self.config.tool_path(Tool::Kubergrunt)?))
    }

    /// Whether kubergrunt is available and runs
    pub async fn kubergrunt_installed(&self) -> bool {
        match self.kubergrunt() {
            Ok(kubergrunt) => kubergrunt.is_installed().await,
            Err(_) => false,
        }
    }

    /// Path of a template file in the fixtures directory
    pub fn fixture(&self, name: &str) -> PathBuf {
        self.config.paths.fixtures_dir.join(name)
    }

    /// Copy a folder of the module repository to a temp dir
    pub fn copy_module_to_temp(&self, subfolder: &Path) -> Result<PathBuf> {
        let paths = &self.config.paths;
        files::copy_folder_to_temp(&paths.repo_root, subfolder, &[paths.stages_dir.as_path()])
    }
}
