//! Configuration and working-directory paths
//!
//! Every test keeps its state under `<stages_dir>/<test name>/.test-data/`,
//! one JSON document per saved key.

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the config directory
const APP_NAME: &str = "kubestage";

/// Directory (inside a working directory) that holds saved values
pub const TEST_DATA_DIR: &str = ".test-data";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/kubestage/`
/// - macOS: `~/Library/Application Support/kubestage/`
/// - Windows: `%APPDATA%\kubestage\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Working directory for a named test
pub fn working_dir(stages_dir: &Path, test_name: &str) -> PathBuf {
    stages_dir.join(test_name)
}

/// Directory holding the saved values of a working directory
pub fn test_data_dir(working_dir: &Path) -> PathBuf {
    working_dir.join(TEST_DATA_DIR)
}

/// File a saved value lives in
pub fn value_path(working_dir: &Path, key: &str) -> PathBuf {
    test_data_dir(working_dir).join(format!("{}.json", key))
}

/// Default location of the user's kubeconfig
///
/// Honours `KUBECONFIG` (first entry) before falling back to `~/.kube/config`.
pub fn home_kube_config() -> Option<PathBuf> {
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&paths).next() {
            if !first.as_os_str().is_empty() {
                return Some(first);
            }
        }
    }

    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".kube").join("config"))
}

/// Create a directory readable only by the owner
///
/// On Unix, creates the directory with mode 0700.
#[cfg(unix)]
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(windows)]
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir(dir)
}
