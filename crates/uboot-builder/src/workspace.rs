use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BuildConfig, WorkspaceConfig};
use crate::error::{Error, Result};

/// Every directory a run touches, resolved once up front so no stage depends on
/// the process working directory.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    pub invocation_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub patch_dir: PathBuf,
    pub boot_cmd: PathBuf,
    pub output_dir: PathBuf,
}

impl BuildPaths {
    // The checkout lives directly in the workspace root.
    pub fn source_dir(&self) -> &Path {
        &self.workspace_dir
    }
}

pub fn resolve_invocation_dir(raw: Option<&Path>) -> Result<PathBuf> {
    let dir = match raw {
        Some(p) => std::path::absolute(p)
            .map_err(|e| Error::msg(format!("failed to resolve {}: {e}", p.display())))?,
        None => std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?,
    };
    if !dir.is_dir() {
        return Err(Error::msg(format!(
            "invocation dir {} is not a directory",
            dir.display()
        )));
    }
    Ok(dir)
}

// Absolute paths are used as-is, relative ones are rooted at `base`.
pub fn resolve_user_path(base: &Path, raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::msg("empty path"));
    }
    let pb = PathBuf::from(raw);
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

/// Creates a fresh, uniquely named workspace directory. It is intentionally
/// left behind when the process exits.
pub fn create_workspace(cfg: &WorkspaceConfig, invocation_dir: &Path) -> Result<PathBuf> {
    let parent = match cfg.parent.as_deref() {
        Some(p) => resolve_user_path(invocation_dir, p)?,
        None => std::env::temp_dir(),
    };
    fs::create_dir_all(&parent).map_err(|e| {
        Error::msg(format!(
            "failed to create workspace parent {}: {e}",
            parent.display()
        ))
    })?;
    let dir = tempfile::Builder::new()
        .prefix(&cfg.prefix)
        .tempdir_in(&parent)
        .map_err(|e| {
            Error::msg(format!(
                "failed to create workspace in {}: {e}",
                parent.display()
            ))
        })?;
    Ok(dir.keep())
}

pub fn prepare(cfg: &BuildConfig, invocation_dir: &Path) -> Result<BuildPaths> {
    let boot_cmd = std::path::absolute(resolve_user_path(invocation_dir, &cfg.boot_script.input)?)
        .map_err(|e| Error::msg(format!("failed to resolve boot command path: {e}")))?;
    if !boot_cmd.is_file() {
        return Err(Error::msg(format!(
            "boot command file {} not found",
            boot_cmd.display()
        )));
    }
    let patch_dir = resolve_user_path(invocation_dir, &cfg.patches.dir)?;
    let output_dir = resolve_user_path(invocation_dir, &cfg.output.dir)?;
    let workspace_dir = create_workspace(&cfg.workspace, invocation_dir)?;

    Ok(BuildPaths {
        invocation_dir: invocation_dir.to_path_buf(),
        workspace_dir,
        patch_dir,
        boot_cmd,
        output_dir,
    })
}
