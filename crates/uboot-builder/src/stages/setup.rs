use crate::config::BuildConfig;
use crate::error::Result;
use crate::executor::ExecCtx;
use crate::workspace;

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let invocation_dir = workspace::resolve_invocation_dir(ctx.invocation_dir())?;
    let paths = workspace::prepare(cfg, &invocation_dir)?;

    ctx.log(&format!("invocation_dir = {}", paths.invocation_dir.display()));
    ctx.log(&format!("workspace = {}", paths.workspace_dir.display()));
    ctx.log(&format!("boot_cmd = {}", paths.boot_cmd.display()));
    ctx.log(&format!("output_dir = {}", paths.output_dir.display()));
    tracing::info!(workspace = %paths.workspace_dir.display(), "workspace created");

    ctx.set_paths(paths);
    Ok(())
}
