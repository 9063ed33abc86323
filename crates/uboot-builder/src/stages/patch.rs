use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.paths()?;
    let src_dir = paths.source_dir().to_path_buf();
    let patches = discover_patches(&paths.patch_dir, &cfg.patches.extension)?;

    if patches.is_empty() {
        tracing::warn!(dir = %paths.patch_dir.display(), "no patches found");
        ctx.log("no patches to apply");
        return Ok(());
    }

    for patch in &patches {
        tracing::info!(patch = %patch.display(), "applying patch");
        ctx.log(&format!("applying {}", patch.display()));
        let f = File::open(patch)
            .map_err(|e| Error::msg(format!("failed to open patch {}: {e}", patch.display())))?;
        let mut cmd = Command::new(&cfg.tools.patch);
        cmd.arg(format!("-p{}", cfg.patches.strip))
            .current_dir(&src_dir);
        ctx.run_cmd_with_stdin(cmd, Stdio::from(f))
            .map_err(|e| Error::msg(format!("{}: {}", patch.display(), e.message())))?;
    }
    ctx.log(&format!("applied {} patch(es)", patches.len()));
    Ok(())
}

/// Regular files directly inside `dir` carrying `extension`, in file-name order.
pub fn discover_patches(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::msg(format!(
            "patch dir {} is not a directory",
            dir.display()
        )));
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            Error::msg(format!("failed to list patches in {}: {e}", dir.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}
