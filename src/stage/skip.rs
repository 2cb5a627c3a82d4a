//! Stage skip directives
//!
//! A stage named `terraform_apply` is skipped when `SKIP_terraform_apply` is
//! set to a non-empty value, or when it was requested explicitly (e.g. with
//! `--skip terraform_apply`).

use std::collections::BTreeSet;

/// Environment variable prefix that marks a stage as skipped
pub const SKIP_ENV_PREFIX: &str = "SKIP_";

/// Set of stages the caller asked to skip
#[derive(Debug, Clone, Default)]
pub struct SkipDirectives {
    explicit: BTreeSet<String>,
    read_env: bool,
}

impl SkipDirectives {
    /// Honour `SKIP_<stage>` environment variables
    pub fn from_env() -> Self {
        Self {
            explicit: BTreeSet::new(),
            read_env: true,
        }
    }

    /// Only honour explicitly named stages
    pub fn explicit_only() -> Self {
        Self::default()
    }

    /// Also skip `stage`
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.explicit.insert(stage.into());
        self
    }

    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit.extend(stages.into_iter().map(Into::into));
        self
    }

    /// Whether `stage` should be skipped right now
    ///
    /// The environment is read on every call, so a directive set between two
    /// stages applies to the second one.
    pub fn should_skip(&self, stage: &str) -> bool {
        if self.explicit.contains(stage) {
            return true;
        }

        self.read_env
            && std::env::var_os(format!("{}{}", SKIP_ENV_PREFIX, stage))
                .is_some_and(|v| !v.is_empty())
    }
}
