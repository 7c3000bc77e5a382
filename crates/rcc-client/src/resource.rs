//! Lookup of package resources installed in a workspace.
//!
//! A resource lives at `<dir>/share/<package>/<relative_path>` for one of the
//! workspace search directories.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rcc_types::ControlError;
use tracing::debug;

/// Search path list, `:`-separated like `PATH`.
pub const WORKSPACE_PATH_VAR: &str = "RCC_WORKSPACE_PATH";
/// Consulted when [`WORKSPACE_PATH_VAR`] is unset or empty.
pub const PREFIX_PATH_VAR: &str = "CMAKE_PREFIX_PATH";

/// Workspace directories from the environment.
pub fn workspace_search_dirs() -> Vec<PathBuf> {
    search_dirs_from(env::var_os(WORKSPACE_PATH_VAR), env::var_os(PREFIX_PATH_VAR))
}

fn search_dirs_from(workspace: Option<OsString>, prefix: Option<OsString>) -> Vec<PathBuf> {
    let non_empty = |v: &OsString| !v.is_empty();
    workspace
        .filter(non_empty)
        .or_else(|| prefix.filter(non_empty))
        .map(|paths| {
            env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Locate `relative_path` inside `package`.
///
/// Exactly one search directory must provide the file.
pub fn find_resource(
    relative_path: impl AsRef<Path>,
    package: &str,
    search_dirs: &[PathBuf],
) -> Result<PathBuf, ControlError> {
    let relative_path = relative_path.as_ref();
    let mut found: Vec<PathBuf> = Vec::new();
    for dir in search_dirs {
        let candidate = dir.join("share").join(package).join(relative_path);
        if candidate.exists() && !found.contains(&candidate) {
            found.push(candidate);
        }
    }
    debug!(package, path = %relative_path.display(), matches = found.len(), "resource lookup");

    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(ControlError::Resource(format!(
            "\"{}\" not found in package {package}",
            relative_path.display()
        ))),
        n => Err(ControlError::Resource(format!(
            "\"{}\" is ambiguous: {n} matches in package {package}",
            relative_path.display()
        ))),
    }
}
