use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Command;

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let src_dir = ctx.paths()?.source_dir().to_path_buf();

    let mut defconfig = Command::new(&cfg.tools.make);
    defconfig
        .arg(format!("ARCH={}", cfg.board.arch))
        .arg(&cfg.board.defconfig)
        .current_dir(&src_dir);
    ctx.run_cmd(defconfig)
        .map_err(|e| Error::msg(format!("make defconfig: {}", e.message())))?;

    let config_path = src_dir.join(".config");
    if ctx.dry_run {
        for line in &cfg.board.config_overrides {
            ctx.log(&format!("DRY-RUN: append '{line}' to {}", config_path.display()));
        }
        return Ok(());
    }
    append_overrides(&config_path, &cfg.board.config_overrides)?;
    for line in &cfg.board.config_overrides {
        ctx.log(&format!("override {line}"));
    }
    Ok(())
}

/// Appends `lines` to an existing kconfig file, one per line. Existing content is
/// never rewritten, so a key set here may also appear earlier in the file; the
/// last occurrence wins in kconfig.
pub fn append_overrides(config_path: &Path, lines: &[String]) -> Result<()> {
    let needs_newline = fs::read(config_path)
        .map(|data| data.last().is_some_and(|b| *b != b'\n'))
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", config_path.display())))?;

    let mut f = OpenOptions::new()
        .append(true)
        .open(config_path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", config_path.display())))?;

    let mut block = String::new();
    if needs_newline {
        block.push('\n');
    }
    for line in lines {
        block.push_str(line);
        block.push('\n');
    }
    f.write_all(block.as_bytes())
        .and_then(|_| f.sync_all())
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", config_path.display())))?;
    Ok(())
}
