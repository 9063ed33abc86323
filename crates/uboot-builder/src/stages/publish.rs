use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.paths()?;
    let output_dir = paths.output_dir.clone();
    let src_dir = paths.source_dir().to_path_buf();

    if !ctx.dry_run && !output_dir.is_dir() {
        return Err(Error::msg(format!(
            "output dir {} does not exist",
            output_dir.display()
        )));
    }

    for name in [&cfg.board.target, &cfg.boot_script.output] {
        let src = src_dir.join(name);
        let dst = output_dir.join(name);
        if ctx.dry_run {
            ctx.log(&format!(
                "DRY-RUN: copy {} -> {}",
                src.display(),
                dst.display()
            ));
            continue;
        }
        copy_file(&src, &dst)?;
        let digest = sha256_file_hex(&dst)?;
        tracing::info!(artifact = %dst.display(), sha256 = %digest, "published");
        ctx.log(&format!("{} sha256={digest}", dst.display()));
    }
    Ok(())
}

/// Copies `src` to `dst` byte for byte, gives `dst` the permission bits of
/// `src` and flushes it to disk. The parent of `dst` must already exist.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    let ctx_err = |what: &str, e: io::Error| {
        Error::msg(format!(
            "failed to {what} {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    };

    let mut input = File::open(src).map_err(|e| ctx_err("open source for copy", e))?;
    let perms = input
        .metadata()
        .map_err(|e| ctx_err("stat source for copy", e))?
        .permissions();
    let mut out = File::create(dst).map_err(|e| ctx_err("create destination for copy", e))?;

    io::copy(&mut input, &mut out).map_err(|e| ctx_err("copy", e))?;
    out.set_permissions(perms)
        .map_err(|e| ctx_err("set permissions on", e))?;
    out.sync_all().map_err(|e| ctx_err("flush", e))?;
    Ok(())
}

fn sha256_file_hex(path: &Path) -> Result<String> {
    let mut f = File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f
            .read(&mut buf)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
