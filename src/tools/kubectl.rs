//! Kubernetes CLI invocation
//!
//! Every call carries the context / kubeconfig / namespace triple from
//! [`KubectlOptions`]; unset fields fall back to kubectl's own defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::common::{paths, Error, Result};

use super::shell::ShellCommand;

/// Which cluster, credentials and namespace a kubectl call targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubectlOptions {
    pub context_name: Option<String>,
    pub config_path: Option<PathBuf>,
    pub namespace: Option<String>,
}

impl KubectlOptions {
    pub fn new(
        context_name: Option<String>,
        config_path: Option<PathBuf>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            context_name,
            config_path,
            namespace,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Global flags selecting context, kubeconfig and namespace
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(context) = non_empty(&self.context_name) {
            flags.push("--context".to_string());
            flags.push(context.to_string());
        }
        if let Some(config) = &self.config_path {
            flags.push("--kubeconfig".to_string());
            flags.push(config.display().to_string());
        }
        if let Some(namespace) = non_empty(&self.namespace) {
            flags.push("--namespace".to_string());
            flags.push(namespace.to_string());
        }
        flags
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Namespace as returned by `kubectl get namespace -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NamespaceStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamespaceStatus {
    #[serde(default)]
    pub phase: String,
}

/// Phase of a namespace that is ready for use
pub const NAMESPACE_ACTIVE: &str = "Active";

/// The parts of a pod needed to decide whether it is available
#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

impl Pod {
    /// Running with every container ready
    pub fn is_available(&self) -> bool {
        self.status.phase == "Running" && self.status.container_statuses.iter().all(|c| c.ready)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    #[serde(default)]
    secrets: Vec<SecretRef>,
}

#[derive(Debug, Deserialize)]
struct SecretRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Secret {
    #[serde(default)]
    data: std::collections::BTreeMap<String, String>,
}

/// kubectl bound to one executable and one set of options
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    options: KubectlOptions,
}

impl Kubectl {
    pub fn new(binary: impl Into<PathBuf>, options: KubectlOptions) -> Self {
        Self {
            binary: binary.into(),
            options,
        }
    }

    /// Same binary, different namespace
    pub fn in_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            binary: self.binary.clone(),
            options: self.options.clone().with_namespace(namespace),
        }
    }

    fn command<I, S>(&self, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        ShellCommand::new(&self.binary)
            .args(self.options.flags())
            .args(args)
    }

    /// Run kubectl and return stdout
    pub async fn run_and_get_output<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        self.command(args).output().await
    }

    /// `kubectl apply` the given manifest text
    pub async fn apply_from_string(&self, manifest: &str) -> Result<()> {
        self.command(["apply", "-f", "-"])
            .stdin(manifest)
            .run()
            .await
    }

    /// `kubectl delete` the resources in the given manifest text
    pub async fn delete_from_string(&self, manifest: &str) -> Result<()> {
        self.command(["delete", "--ignore-not-found", "-f", "-"])
            .stdin(manifest)
            .run()
            .await
    }

    pub async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let raw = self
            .run_and_get_output(["get", "namespace", name, "-o", "json"])
            .await?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::unexpected_output("kubectl get namespace", e.to_string()))
    }

    pub async fn create_namespace(&self, name: &str) -> Result<()> {
        self.command(["create", "namespace", name]).run().await
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.command(["delete", "namespace", name]).run().await
    }

    /// Create a service account in the configured namespace
    pub async fn create_service_account(&self, name: &str) -> Result<()> {
        self.command(["create", "serviceaccount", name]).run().await
    }

    pub async fn get_pod(&self, name: &str) -> Result<Pod> {
        let raw = self
            .run_and_get_output(["get", "pod", name, "-o", "json"])
            .await?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::unexpected_output("kubectl get pod", e.to_string()))
    }

    /// Bearer token of a service account in the configured namespace
    ///
    /// The token controller fills in the account's secret shortly after the
    /// account is created, so the account is read up to `retries` times.
    /// Clusters that no longer mint token secrets get a token from
    /// `kubectl create token` once the retries run out.
    pub async fn get_service_account_auth_token(
        &self,
        name: &str,
        retries: u32,
        sleep_between: Duration,
    ) -> Result<String> {
        for attempt in 1..=retries {
            let raw = self
                .run_and_get_output(["get", "serviceaccount", name, "-o", "json"])
                .await?;
            let account: ServiceAccount = serde_json::from_str(&raw).map_err(|e| {
                Error::unexpected_output("kubectl get serviceaccount", e.to_string())
            })?;

            if let Some(secret_ref) = account.secrets.first() {
                return self.read_token_secret(&secret_ref.name).await;
            }

            tracing::debug!(service_account = name, attempt, "Token secret not populated yet");
            if attempt < retries {
                sleep(sleep_between).await;
            }
        }

        tracing::debug!(service_account = name, "No token secret, requesting a token");
        let token = self.run_and_get_output(["create", "token", name]).await?;
        Ok(token.trim().to_string())
    }

    async fn read_token_secret(&self, secret: &str) -> Result<String> {
        let raw = self
            .run_and_get_output(["get", "secret", secret, "-o", "json"])
            .await?;
        let secret: Secret = serde_json::from_str(&raw)
            .map_err(|e| Error::unexpected_output("kubectl get secret", e.to_string()))?;

        let encoded = secret.data.get("token").ok_or_else(|| {
            Error::unexpected_output("kubectl get secret", "secret has no token")
        })?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::unexpected_output("kubectl get secret", e.to_string()))?;

        String::from_utf8(decoded)
            .map(|t| t.trim().to_string())
            .map_err(|e| Error::unexpected_output("kubectl get secret", e.to_string()))
    }

    /// Add a kubeconfig context that authenticates as a service account
    ///
    /// The context points at the cluster of the current context and uses a
    /// user entry holding `token`.
    pub async fn add_config_context_for_service_account(
        &self,
        context_name: &str,
        user_name: &str,
        token: &str,
    ) -> Result<()> {
        let cluster = self
            .run_and_get_output([
                "config",
                "view",
                "--minify",
                "-o",
                "jsonpath={.contexts[0].context.cluster}",
            ])
            .await?;
        let cluster = cluster.trim();
        if cluster.is_empty() {
            return Err(Error::unexpected_output(
                "kubectl config view",
                "current context has no cluster",
            ));
        }

        let token_flag = format!("--token={}", token);
        self.config_command(["config", "set-credentials", user_name, token_flag.as_str()])
            .run()
            .await?;

        let cluster_flag = format!("--cluster={}", cluster);
        let user_flag = format!("--user={}", user_name);
        self.config_command([
            "config",
            "set-context",
            context_name,
            cluster_flag.as_str(),
            user_flag.as_str(),
        ])
            .run()
            .await
    }

    // `kubectl config set-*` rejects --context and --namespace
    fn config_command<I, S>(&self, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let mut cmd = ShellCommand::new(&self.binary);
        if let Some(config) = &self.options.config_path {
            cmd = cmd.arg("--kubeconfig").arg(config);
        }
        cmd.args(args)
    }

    /// Poll until a pod is running with all containers ready
    pub async fn wait_until_pod_available(
        &self,
        name: &str,
        retries: u32,
        sleep_between: Duration,
    ) -> Result<()> {
        for attempt in 1..=retries {
            match self.get_pod(name).await {
                Ok(pod) if pod.is_available() => {
                    tracing::info!(pod = name, attempt, "Pod is available");
                    return Ok(());
                }
                Ok(pod) => {
                    tracing::debug!(pod = name, attempt, phase = %pod.status.phase, "Pod not available yet");
                }
                Err(e) => {
                    tracing::debug!(pod = name, attempt, error = %e, "Pod not found yet");
                }
            }

            if attempt < retries {
                sleep(sleep_between).await;
            }
        }

        Err(Error::RetriesExhausted {
            what: format!("Pod {}", name),
            attempts: retries,
        })
    }

    /// Run a command inside a pod container and return its stdout
    pub async fn exec(&self, pod: &str, container: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["exec", "-i", pod, "-c", container, "--"];
        args.extend_from_slice(command);
        self.run_and_get_output(args).await
    }
}

/// Copy the user's kubeconfig to a temp file that outlives this process
pub fn copy_home_kube_config_to_temp() -> Result<PathBuf> {
    let source = paths::home_kube_config()
        .ok_or_else(|| Error::Config("Cannot locate home directory for kubeconfig".to_string()))?;
    copy_kube_config_to_temp(&source)
}

/// Copy a kubeconfig to a kept temp file
pub fn copy_kube_config_to_temp(source: &Path) -> Result<PathBuf> {
    let content = std::fs::read(source).map_err(|e| Error::FileRead {
        path: source.display().to_string(),
        error: e.to_string(),
    })?;

    let file = tempfile::Builder::new()
        .prefix("kubeconfig-")
        .tempfile()?;
    std::fs::write(file.path(), content)?;

    let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
    tracing::info!(path = %path.display(), "Copied kubeconfig");
    Ok(path)
}
