use std::collections::BTreeMap;
use std::process::Command;

use crate::config::{BuildConfig, SourceConfig};
use crate::error::Result;
use crate::executor::ExecCtx;
use crate::stages::apply_command_env;

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let src_dir = ctx.paths()?.source_dir().to_path_buf();
    let git_env = resolve_git_env(&cfg.source);

    ctx.log(&format!("source.repo = {}", cfg.source.repo));
    ctx.log(&format!("source.rev = {}", cfg.source.rev));
    if let (Some(limit), Some(time)) = (
        git_env.get("GIT_HTTP_LOW_SPEED_LIMIT"),
        git_env.get("GIT_HTTP_LOW_SPEED_TIME"),
    ) {
        ctx.log(&format!("git transfer stall guard: {limit} B/s for {time}s"));
    }

    for args in git_steps(&cfg.source) {
        tracing::info!(args = ?args, "running git");
        let mut cmd = Command::new(&cfg.tools.git);
        cmd.args(&args).current_dir(&src_dir);
        apply_command_env(&mut cmd, &git_env);
        ctx.run_cmd(cmd)?;
    }
    Ok(())
}

// A shallow fetch of exactly one commit; nothing else from upstream is needed.
fn git_steps(src: &SourceConfig) -> [Vec<String>; 4] {
    [
        vec!["init".into()],
        vec![
            "remote".into(),
            "add".into(),
            "origin".into(),
            src.repo.clone(),
        ],
        vec![
            "fetch".into(),
            "--depth=1".into(),
            "origin".into(),
            src.rev.clone(),
        ],
        vec!["checkout".into(), "FETCH_HEAD".into()],
    ]
}

fn resolve_git_env(src: &SourceConfig) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::<String, String>::new();
    envs.insert("GIT_TERMINAL_PROMPT".into(), "0".into());

    match src.git_http_low_speed_limit {
        Some(0) => {}
        Some(limit) => {
            envs.insert("GIT_HTTP_LOW_SPEED_LIMIT".into(), limit.to_string());
        }
        None => {
            envs.insert("GIT_HTTP_LOW_SPEED_LIMIT".into(), "1024".into());
        }
    }
    match src.git_http_low_speed_time {
        Some(0) => {}
        Some(time) => {
            envs.insert("GIT_HTTP_LOW_SPEED_TIME".into(), time.to_string());
        }
        None => {
            envs.insert("GIT_HTTP_LOW_SPEED_TIME".into(), "60".into());
        }
    }
    envs
}
