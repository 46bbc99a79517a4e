//! Workspace confinement for filesystem tools.

use crate::error::ToolError;
use std::path::{Component, Path, PathBuf};

/// Return the canonical workspace root.
pub fn workspace_root(working_dir: &Path) -> Result<PathBuf, ToolError> {
    working_dir
        .canonicalize()
        .map_err(|e| ToolError::ExecutionError(format!("Cannot resolve working dir: {e}")))
}

/// Resolve an existing path and ensure it stays within workspace.
pub fn resolve_existing_path(path: &Path, working_dir: &Path) -> Result<PathBuf, ToolError> {
    let workspace = workspace_root(working_dir)?;
    let candidate = absolutize(path, &workspace);
    let canonical = candidate
        .canonicalize()
        .map_err(|e| ToolError::ExecutionError(format!("Cannot resolve path: {e}")))?;
    ensure_within_workspace(path, &canonical, &workspace)?;
    Ok(canonical)
}

fn absolutize(path: &Path, workspace: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&workspace.join(path))
    }
}

fn ensure_within_workspace(original: &Path, resolved: &Path, workspace: &Path) -> Result<(), ToolError> {
    if !resolved.starts_with(workspace) {
        return Err(ToolError::PermissionDenied(format!(
            "Path '{}' is outside the working directory",
            original.display()
        )));
    }
    Ok(())
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir => out.push(component.as_os_str()),
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::Normal(seg) => out.push(seg),
        }
    }
    out
}
