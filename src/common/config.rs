//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Source and state locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Poll settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Helm and Tiller settings
    #[serde(default)]
    pub helm: HelmConfig,
}

/// Explicit paths to the external CLIs
///
/// Anything left unset is looked up on `PATH`.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ToolsConfig {
    pub terraform: Option<PathBuf>,
    pub kubectl: Option<PathBuf>,
    pub helm: Option<PathBuf>,
    pub kubergrunt: Option<PathBuf>,
}

/// External tools the harness drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Terraform,
    Kubectl,
    Helm,
    Kubergrunt,
}

impl Tool {
    /// Executable name looked up on `PATH`
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::Terraform => "terraform",
            Tool::Kubectl => "kubectl",
            Tool::Helm => "helm",
            Tool::Kubergrunt => "kubergrunt",
        }
    }
}

/// Source and state locations
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Root of the repository holding the modules under test
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,

    /// Directory under which each test keeps its working directory
    #[serde(default = "default_stages_dir")]
    pub stages_dir: PathBuf,

    /// Directory holding the request and manifest templates
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            stages_dir: default_stages_dir(),
            fixtures_dir: default_fixtures_dir(),
        }
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_stages_dir() -> PathBuf {
    PathBuf::from("stages")
}
fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("kubefixtures")
}

/// Poll settings for waiting on provisioned resources
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How many times to check a pod before giving up
    #[serde(default = "default_pod_retries")]
    pub pod_available_retries: u32,

    /// Delay between pod checks
    #[serde(default = "default_pod_sleep")]
    pub pod_available_sleep_secs: u64,

    /// How many times to read a new service account before giving up on its token secret
    #[serde(default = "default_token_retries")]
    pub token_secret_retries: u32,

    /// Delay between service account reads
    #[serde(default = "default_token_sleep")]
    pub token_secret_sleep_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pod_available_retries: default_pod_retries(),
            pod_available_sleep_secs: default_pod_sleep(),
            token_secret_retries: default_token_retries(),
            token_secret_sleep_secs: default_token_sleep(),
        }
    }
}

impl Timeouts {
    pub fn pod_available_sleep(&self) -> Duration {
        Duration::from_secs(self.pod_available_sleep_secs)
    }

    pub fn token_secret_sleep(&self) -> Duration {
        Duration::from_secs(self.token_secret_sleep_secs)
    }
}

fn default_pod_retries() -> u32 {
    60
}
fn default_pod_sleep() -> u64 {
    5
}
fn default_token_retries() -> u32 {
    15
}
fn default_token_sleep() -> u64 {
    2
}

/// Helm and Tiller settings
#[derive(Debug, Deserialize, Clone)]
pub struct HelmConfig {
    /// Chart installed to prove the deployment works
    #[serde(default = "default_chart")]
    pub chart: String,

    /// RBAC user granted access by `kubergrunt helm configure`
    #[serde(default = "default_rbac_user")]
    pub rbac_user: String,

    /// Tiller version deployed by the modules
    #[serde(default = "default_tiller_version")]
    pub tiller_version: String,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            chart: default_chart(),
            rbac_user: default_rbac_user(),
            tiller_version: default_tiller_version(),
        }
    }
}

fn default_chart() -> String {
    "stable/kubernetes-dashboard".to_string()
}
fn default_rbac_user() -> String {
    "minikube".to_string()
}
fn default_tiller_version() -> String {
    "v2.11.0".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the executable for a tool
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn tool_path(&self, tool: Tool) -> Result<PathBuf> {
        let configured = match tool {
            Tool::Terraform => &self.tools.terraform,
            Tool::Kubectl => &self.tools.kubectl,
            Tool::Helm => &self.tools.helm,
            Tool::Kubergrunt => &self.tools.kubergrunt,
        };

        if let Some(path) = configured {
            return Ok(path.clone());
        }

        which::which(tool.binary_name())
            .map_err(|_| Error::tool_not_found(tool.binary_name(), &["config [tools]", "PATH"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.paths.stages_dir, PathBuf::from("stages"));
        assert_eq!(config.timeouts.pod_available_retries, 60);
        assert_eq!(config.timeouts.pod_available_sleep(), Duration::from_secs(5));
        assert_eq!(config.timeouts.token_secret_retries, 15);
        assert_eq!(config.timeouts.token_secret_sleep(), Duration::from_secs(2));
        assert_eq!(config.helm.chart, "stable/kubernetes-dashboard");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
[tools]
terraform = "/opt/bin/terraform"

[timeouts]
pod_available_retries = 3
"#,
        )
        .unwrap();

        assert_eq!(
            config.tool_path(Tool::Terraform).unwrap(),
            PathBuf::from("/opt/bin/terraform")
        );
        assert_eq!(config.timeouts.pod_available_retries, 3);
        assert_eq!(config.timeouts.pod_available_sleep_secs, 5);
        assert_eq!(config.helm.rbac_user, "minikube");
    }

    #[test]
    fn malformed_config_is_rejected() {
        let err = Config::parse("[timeouts]\npod_available_retries = \"many\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
