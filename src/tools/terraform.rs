//! Terraform invocation
//!
//! Wraps `init`, `plan`, `apply`, `destroy` and `output` for a module
//! directory plus a set of input variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

use super::shell::ShellCommand;

/// Everything needed to drive terraform against one module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerraformOptions {
    /// Module directory terraform runs in
    pub terraform_dir: PathBuf,
    /// Input variables, passed as `-var name=value`
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    /// Extra environment for every terraform invocation
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

impl TerraformOptions {
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// A string-valued input variable
    pub fn var_str(&self, name: &str) -> Result<&str> {
        match self.vars.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(Error::TerraformVar {
                name: name.to_string(),
                reason: format!("is not a string: {}", other),
            }),
            None => Err(Error::TerraformVar {
                name: name.to_string(),
                reason: "is not set".to_string(),
            }),
        }
    }

    /// `-var name=value` pairs in a stable order
    pub fn var_args(&self) -> Vec<String> {
        self.vars
            .iter()
            .flat_map(|(name, value)| {
                ["-var".to_string(), format!("{}={}", name, format_var(value))]
            })
            .collect()
    }
}

/// Format a variable value the way terraform's `-var` flag expects
///
/// Top-level strings are passed raw; anything nested is an HCL literal.
pub fn format_var(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => hcl_literal(other),
    }
}

fn hcl_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // JSON string escaping is valid HCL string escaping
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(hcl_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{} = {}", k, hcl_literal(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Resource deltas reported by a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCount {
    pub add: u32,
    pub change: u32,
    pub destroy: u32,
}

impl ResourceCount {
    /// Parse the summary line of `terraform plan` output
    pub fn parse(plan_output: &str) -> Result<Self> {
        static PLAN_SUMMARY: OnceLock<Regex> = OnceLock::new();
        let summary = PLAN_SUMMARY.get_or_init(|| {
            Regex::new(r"Plan: (\d+) to add, (\d+) to change, (\d+) to destroy\.")
                .expect("plan summary pattern is valid")
        });

        if let Some(caps) = summary.captures(plan_output) {
            let count = |i: usize| -> Result<u32> {
                caps[i].parse().map_err(|e| {
                    Error::unexpected_output("terraform plan", format!("bad count: {}", e))
                })
            };
            return Ok(Self {
                add: count(1)?,
                change: count(2)?,
                destroy: count(3)?,
            });
        }

        if plan_output.contains("No changes.") {
            return Ok(Self::default());
        }

        Err(Error::unexpected_output(
            "terraform plan",
            "no plan summary found",
        ))
    }
}

/// Terraform CLI bound to one executable
#[derive(Debug, Clone)]
pub struct Terraform {
    binary: PathBuf,
}

impl Terraform {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, options: &TerraformOptions, subcommand: &str) -> ShellCommand {
        ShellCommand::new(&self.binary)
            .arg(subcommand)
            .current_dir(&options.terraform_dir)
            .envs(&options.env_vars)
    }

    pub async fn init(&self, options: &TerraformOptions) -> Result<()> {
        self.command(options, "init")
            .args(["-input=false", "-no-color"])
            .run()
            .await
    }

    /// Run `plan` and return its stdout
    pub async fn plan(&self, options: &TerraformOptions) -> Result<String> {
        self.command(options, "plan")
            .args(["-input=false", "-lock=false", "-no-color"])
            .args(options.var_args())
            .output()
            .await
    }

    pub async fn init_and_plan(&self, options: &TerraformOptions) -> Result<String> {
        self.init(options).await?;
        self.plan(options).await
    }

    pub async fn apply(&self, options: &TerraformOptions) -> Result<String> {
        self.command(options, "apply")
            .args(["-input=false", "-auto-approve", "-no-color"])
            .args(options.var_args())
            .output()
            .await
    }

    pub async fn init_and_apply(&self, options: &TerraformOptions) -> Result<String> {
        self.init(options).await?;
        self.apply(options).await
    }

    pub async fn destroy(&self, options: &TerraformOptions) -> Result<String> {
        self.command(options, "destroy")
            .args(["-input=false", "-auto-approve", "-no-color"])
            .args(options.var_args())
            .output()
            .await
    }

    /// Read an output as a string
    ///
    /// String outputs are returned verbatim, anything else as compact JSON.
    pub async fn output(&self, options: &TerraformOptions, name: &str) -> Result<String> {
        let raw = self
            .command(options, "output")
            .args(["-no-color", "-json", name])
            .output()
            .await?;

        let value: Value = serde_json::from_str(raw.trim()).map_err(|e| Error::TerraformOutput {
            name: name.to_string(),
            reason: format!("is not valid JSON: {}", e),
        })?;

        Ok(match value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Read an output that must be non-empty
    pub async fn output_required(&self, options: &TerraformOptions, name: &str) -> Result<String> {
        let value = self.output(options, name).await?;
        if value.is_empty() {
            return Err(Error::TerraformOutput {
                name: name.to_string(),
                reason: "is empty".to_string(),
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plan_summary() {
        let out = "...\nPlan: 4 to add, 0 to change, 1 to destroy.\n";
        assert_eq!(
            ResourceCount::parse(out).unwrap(),
            ResourceCount {
                add: 4,
                change: 0,
                destroy: 1
            }
        );
    }

    #[test]
    fn no_changes_is_all_zero() {
        let out = "No changes. Your infrastructure matches the configuration.";
        assert_eq!(ResourceCount::parse(out).unwrap(), ResourceCount::default());
    }

    #[test]
    fn missing_summary_is_an_error() {
        assert!(ResourceCount::parse("Error: something broke").is_err());
    }

    #[test]
    fn formats_vars_as_hcl() {
        assert_eq!(format_var(&json!("plain")), "plain");
        assert_eq!(format_var(&json!(0)), "0");
        assert_eq!(format_var(&json!(["ns/sa"])), r#"["ns/sa"]"#);
        assert_eq!(
            format_var(&json!({"common_name": "tiller", "org": "gruntwork"})),
            r#"{common_name = "tiller", org = "gruntwork"}"#
        );
    }

    #[test]
    fn var_args_are_sorted_pairs() {
        let options = TerraformOptions::new("/mod")
            .with_var("name", "abc")
            .with_var("create_resources", 0);
        assert_eq!(
            options.var_args(),
            vec!["-var", "create_resources=0", "-var", "name=abc"]
        );
    }

    #[test]
    fn var_str_rejects_missing_and_non_strings() {
        let options = TerraformOptions::new("/mod")
            .with_var("resource_namespace", "abc-resources")
            .with_var("create_resources", 0);
        assert_eq!(options.var_str("resource_namespace").unwrap(), "abc-resources");
        assert!(options.var_str("create_resources").is_err());
        assert!(options.var_str("tiller_version").is_err());
    }
}
