use std::path::Path;
use std::process::Command;

use crate::config::{BootScriptConfig, BuildConfig};
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::stages::{apply_command_env, cross_env, describe_epoch};
use crate::workspace::resolve_user_path;

pub fn run(cfg: &BuildConfig, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.paths()?;
    let src_dir = paths.source_dir().to_path_buf();
    let boot_cmd = paths.boot_cmd.clone();
    let bs = &cfg.boot_script;

    // Stamped with its own epoch, independent of the compile stage.
    let envs = cross_env(cfg, bs.source_date_epoch);
    ctx.log(&format!(
        "SOURCE_DATE_EPOCH = {}",
        describe_epoch(bs.source_date_epoch)
    ));

    let mkimage = resolve_user_path(&src_dir, &bs.mkimage)?;
    let mut cmd = Command::new(&mkimage);
    cmd.args(mkimage_args(bs, &boot_cmd)).current_dir(&src_dir);
    apply_command_env(&mut cmd, &envs);
    ctx.run_cmd(cmd)
        .map_err(|e| Error::msg(format!("mkimage: {}", e.message())))?;

    let out = src_dir.join(&bs.output);
    if !ctx.dry_run && !out.is_file() {
        return Err(Error::msg(format!(
            "mkimage succeeded but {} was not produced",
            out.display()
        )));
    }
    Ok(())
}

fn mkimage_args(bs: &BootScriptConfig, boot_cmd: &Path) -> Vec<String> {
    vec![
        "-A".into(),
        bs.arch.clone(),
        "-O".into(),
        bs.os.clone(),
        "-T".into(),
        bs.image_type.clone(),
        "-C".into(),
        bs.compression.clone(),
        "-a".into(),
        bs.load_address.clone(),
        "-e".into(),
        bs.entry_address.clone(),
        "-n".into(),
        bs.name.clone(),
        "-d".into(),
        boot_cmd.display().to_string(),
        bs.output.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkimage_wraps_boot_cmd_as_script_image() {
        let args = mkimage_args(
            &BootScriptConfig::default(),
            Path::new("/work/hc2/boot.cmd"),
        );
        assert_eq!(
            args,
            vec![
                "-A",
                "arm",
                "-O",
                "linux",
                "-T",
                "script",
                "-C",
                "none",
                "-a",
                "0",
                "-e",
                "0",
                "-n",
                "Gokrazy Boot Script",
                "-d",
                "/work/hc2/boot.cmd",
                "boot.scr"
            ]
        );
    }
}
