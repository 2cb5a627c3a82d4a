//! Module source copies
//!
//! Each test applies its own copy of the module sources so parallel tests
//! never share terraform state.

use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

/// Copy `root` into a fresh temp directory and return the path of `subfolder` in the copy
///
/// Hidden entries (`.terraform`, `.git`, ...), terraform state files and any
/// directory named in `exclude_dirs` are left behind. The copy is kept after
/// this process exits so later invocations can reuse it.
pub fn copy_folder_to_temp(root: &Path, subfolder: &Path, exclude_dirs: &[&Path]) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "Module root '{}' is not a directory",
            root.display()
        )));
    }

    let root = root.canonicalize()?;
    let excluded: Vec<PathBuf> = exclude_dirs
        .iter()
        .filter_map(|d| d.canonicalize().ok())
        .collect();

    let prefix = format!(
        "{}-",
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string())
    );
    let dest = tempfile::Builder::new().prefix(&prefix).tempdir()?.keep();

    copy_tree(&root, &dest, &excluded)?;

    let target = dest.join(subfolder);
    if !target.is_dir() {
        return Err(Error::Config(format!(
            "'{}' does not exist in '{}'",
            subfolder.display(),
            root.display()
        )));
    }

    tracing::info!(path = %target.display(), "Copied module sources");
    Ok(target)
}

fn copy_tree(src: &Path, dest: &Path, excluded: &[PathBuf]) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if should_skip(&name) || excluded.iter().any(|e| e == &path) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&path, &dest.join(&*name), excluded)?;
        } else if file_type.is_file() {
            std::fs::copy(&path, dest.join(&*name))?;
        } else if file_type.is_symlink() {
            // Follow links so the copy stands on its own
            let resolved = std::fs::metadata(&path)?;
            if resolved.is_dir() {
                copy_tree(&path, &dest.join(&*name), excluded)?;
            } else {
                std::fs::copy(&path, dest.join(&*name))?;
            }
        }
    }

    Ok(())
}

fn should_skip(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".tfstate") || name.ends_with(".tfstate.backup")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    #[test]
    fn copies_module_without_state_or_hidden_files() {
        let src = tempfile::tempdir().unwrap();
        let root = src.path();
        touch(&root.join("main.tf"));
        touch(&root.join("examples/k8s-namespace-with-service-account/main.tf"));
        touch(&root.join("examples/k8s-namespace-with-service-account/terraform.tfstate"));
        touch(&root.join(".terraform/plugins/provider"));
        touch(&root.join("test/stages/TestX/.test-data/uniqueID.json"));

        let stages = root.join("test/stages");
        let copy = copy_folder_to_temp(
            root,
            Path::new("examples/k8s-namespace-with-service-account"),
            &[stages.as_path()],
        )
        .unwrap();

        assert!(copy.join("main.tf").is_file());
        assert!(!copy.join("terraform.tfstate").exists());

        let copied_root = copy.parent().unwrap().parent().unwrap();
        assert!(copied_root.join("main.tf").is_file());
        assert!(!copied_root.join(".terraform").exists());
        assert!(!copied_root.join("test/stages").exists());

        std::fs::remove_dir_all(copied_root).unwrap();
    }

    #[test]
    fn missing_subfolder_is_an_error() {
        let src = tempfile::tempdir().unwrap();
        touch(&src.path().join("main.tf"));

        let err = copy_folder_to_temp(src.path(), Path::new("examples/nope"), &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
