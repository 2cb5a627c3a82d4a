//! Persisted stage values
//!
//! Values are JSON documents under `<working_dir>/.test-data/`. A later
//! stage, possibly in another process, loads what an earlier stage saved.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::paths;
use crate::common::{Error, Result};
use crate::tools::terraform::TerraformOptions;

/// Key the terraform options record is saved under
pub const TERRAFORM_OPTIONS_KEY: &str = "TerraformOptions";

/// Save/load handle scoped to one working directory
#[derive(Debug, Clone)]
pub struct StageStore {
    working_dir: PathBuf,
}

impl StageStore {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Serialize `value` under `key`, replacing any previous value
    pub fn save_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = paths::value_path(&self.working_dir, key);
        let data_dir = paths::test_data_dir(&self.working_dir);
        std::fs::create_dir_all(&data_dir)?;

        let json = serde_json::to_vec_pretty(value)?;
        std::fs::write(&path, json)?;

        tracing::debug!(key, path = %path.display(), "Saved stage value");
        Ok(())
    }

    /// Deserialize the value saved under `key`
    ///
    /// Fails with `StageValueMissing` when nothing was ever saved, which is
    /// what happens when a producing stage is skipped before it has run once.
    pub fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let path = paths::value_path(&self.working_dir, key);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::StageValueMissing {
                    key: key.to_string(),
                    path,
                });
            }
            Err(e) => {
                return Err(Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                });
            }
        };

        let value = serde_json::from_slice(&bytes).map_err(|e| Error::StageValueCorrupt {
            key: key.to_string(),
            path: path.clone(),
            error: e.to_string(),
        })?;

        tracing::debug!(key, path = %path.display(), "Loaded stage value");
        Ok(value)
    }

    pub fn save_string(&self, key: &str, value: &str) -> Result<()> {
        self.save_value(key, value)
    }

    pub fn load_string(&self, key: &str) -> Result<String> {
        self.load_value(key)
    }

    pub fn save_terraform_options(&self, options: &TerraformOptions) -> Result<()> {
        self.save_value(TERRAFORM_OPTIONS_KEY, options)
    }

    pub fn load_terraform_options(&self) -> Result<TerraformOptions> {
        self.load_value(TERRAFORM_OPTIONS_KEY)
    }

    /// Whether a value has been saved under `key`
    pub fn is_saved(&self, key: &str) -> bool {
        paths::value_path(&self.working_dir, key).is_file()
    }

    /// Keys currently saved, sorted
    pub fn saved_keys(&self) -> Result<Vec<String>> {
        let data_dir = paths::test_data_dir(&self.working_dir);
        if !data_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove the whole working directory
    pub fn clean(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.working_dir) {
            Ok(()) => {
                tracing::info!(dir = %self.working_dir.display(), "Removed working directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
