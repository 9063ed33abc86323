use std::process::Command;

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::stages::{apply_command_env, cross_env, describe_epoch};

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let src_dir = ctx.paths()?.source_dir().to_path_buf();
    let jobs = resolve_jobs(cfg.board.jobs);
    let envs = cross_env(cfg, cfg.source.source_date_epoch);

    ctx.log(&format!("target = {}", cfg.board.target));
    ctx.log(&format!("jobs = {jobs}"));
    ctx.log(&format!("CROSS_COMPILE = {}", cfg.board.cross_compile));
    ctx.log(&format!(
        "SOURCE_DATE_EPOCH = {}",
        describe_epoch(cfg.source.source_date_epoch)
    ));

    let mut make = Command::new(&cfg.tools.make);
    make.arg(&cfg.board.target)
        .arg(format!("-j{jobs}"))
        .current_dir(&src_dir);
    apply_command_env(&mut make, &envs);
    ctx.run_cmd(make)
        .map_err(|e| Error::msg(format!("make: {}", e.message())))?;

    let out = src_dir.join(&cfg.board.target);
    if !ctx.dry_run && !out.is_file() {
        return Err(Error::msg(format!(
            "make succeeded but {} was not produced",
            out.display()
        )));
    }
    Ok(())
}

// Parallelism follows the build host, not the target board.
fn resolve_jobs(configured: usize) -> usize {
    if configured == 0 {
        num_cpus::get().max(1)
    } else {
        configured
    }
}
