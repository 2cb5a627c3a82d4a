//! Helm client invocation

use std::path::PathBuf;

use crate::common::Result;

use super::kubectl::KubectlOptions;
use super::shell::ShellCommand;

/// Environment file `kubergrunt helm configure` writes into the helm home
pub const HELM_ENV_FILE: &str = "env";

/// Helm client bound to one executable and one client home
#[derive(Debug, Clone)]
pub struct Helm {
    binary: PathBuf,
    helm_home: PathBuf,
}

impl Helm {
    pub fn new(binary: impl Into<PathBuf>, helm_home: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            helm_home: helm_home.into(),
        }
    }

    /// Helm arguments targeting the cluster described by `options`
    pub fn args(&self, options: &KubectlOptions, args: &[&str]) -> Vec<String> {
        let mut helm_args = Vec::new();
        if let Some(context) = options.context_name.as_deref().filter(|c| !c.is_empty()) {
            helm_args.push("--kube-context".to_string());
            helm_args.push(context.to_string());
        }
        if let Some(config) = &options.config_path {
            helm_args.push("--kubeconfig".to_string());
            helm_args.push(config.display().to_string());
        }
        if let Some(namespace) = options.namespace.as_deref().filter(|n| !n.is_empty()) {
            helm_args.push("--namespace".to_string());
            helm_args.push(namespace.to_string());
        }
        helm_args.extend(args.iter().map(|a| a.to_string()));
        helm_args
    }

    /// Build the command line for a helm invocation
    ///
    /// When the helm home carries an `env` file (TLS and Tiller settings from
    /// `kubergrunt helm configure`) it is sourced first; otherwise the home is
    /// passed with `--home`.
    pub fn command(&self, options: &KubectlOptions, args: &[&str]) -> ShellCommand {
        let helm_args = self.args(options, args);
        let env_file = self.helm_home.join(HELM_ENV_FILE);

        if env_file.is_file() {
            let mut line = vec![shell_quote(&self.binary.display().to_string())];
            line.extend(helm_args.iter().map(|a| shell_quote(a)));
            let script = format!(
                ". {} && {}",
                shell_quote(&env_file.display().to_string()),
                line.join(" ")
            );
            ShellCommand::new("sh").arg("-c").arg(script)
        } else {
            ShellCommand::new(&self.binary)
                .arg("--home")
                .arg(&self.helm_home)
                .args(helm_args)
        }
    }

    pub async fn run(&self, options: &KubectlOptions, args: &[&str]) -> Result<()> {
        self.command(options, args).run().await
    }
}

fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_context_config_and_namespace() {
        let helm = Helm::new("helm", "/tmp/.helm");
        let options = KubectlOptions::new(
            Some("sa".into()),
            Some(PathBuf::from("/tmp/kubeconfig")),
            Some("abc-resources".into()),
        );

        assert_eq!(
            helm.args(&options, &["install", "stable/kubernetes-dashboard", "--wait"]),
            vec![
                "--kube-context",
                "sa",
                "--kubeconfig",
                "/tmp/kubeconfig",
                "--namespace",
                "abc-resources",
                "install",
                "stable/kubernetes-dashboard",
                "--wait",
            ]
        );
    }

    #[test]
    fn without_env_file_home_is_passed_explicitly() {
        let tmp = tempfile::tempdir().unwrap();
        let helm = Helm::new("helm", tmp.path());
        let display = helm
            .command(&KubectlOptions::default(), &["init", "--upgrade"])
            .display();
        assert_eq!(
            display,
            format!("helm --home {} init --upgrade", tmp.path().display())
        );
    }

    #[test]
    fn with_env_file_it_is_sourced() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(HELM_ENV_FILE), "export HELM_TLS_ENABLE=true\n").unwrap();
        let helm = Helm::new("helm", tmp.path());

        let display = helm
            .command(&KubectlOptions::default().with_namespace("ns"), &["ls"])
            .display();
        assert!(display.starts_with("sh -c . "));
        assert!(display.ends_with("&& helm --namespace ns ls"));
    }

    #[test]
    fn quoting_protects_spaces_and_quotes() {
        assert_eq!(shell_quote("plain-value"), "plain-value");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
