//! Staged, resumable test execution
//!
//! Provides the stage runner, the working-directory value store, skip
//! directives and helpers for grouping concurrent validation checks.

mod checks;
mod runner;
mod skip;
mod store;

pub use checks::{Assertions, CheckGroup};
pub use runner::{StageOutcome, StageRecord, StageRunner};
pub use skip::{SkipDirectives, SKIP_ENV_PREFIX};
pub use store::{StageStore, TERRAFORM_OPTIONS_KEY};
