use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;

use serde::Serialize;

use crate::config::BuildConfig;
use crate::error::Result;
use crate::executor::ExecCtx;

pub mod boot_script;
pub mod compile;
pub mod configure;
pub mod fetch;
pub mod patch;
pub mod publish;
pub mod setup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Workspace,
    Fetch,
    Patch,
    Configure,
    Compile,
    BootScript,
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Workspace,
        Stage::Fetch,
        Stage::Patch,
        Stage::Configure,
        Stage::Compile,
        Stage::BootScript,
        Stage::Publish,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Stage::Workspace => "workspace",
            Stage::Fetch => "fetch",
            Stage::Patch => "patch",
            Stage::Configure => "configure",
            Stage::Compile => "compile",
            Stage::BootScript => "boot-script",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

pub type StageFn = fn(&BuildConfig, &mut ExecCtx) -> Result<()>;

pub struct StageDef {
    pub stage: Stage,
    pub label: &'static str,
    pub run: StageFn,
}

pub fn pipeline() -> Vec<StageDef> {
    vec![
        StageDef {
            stage: Stage::Workspace,
            label: "Prepare workspace",
            run: setup::run,
        },
        StageDef {
            stage: Stage::Fetch,
            label: "Fetch U-Boot source",
            run: fetch::run,
        },
        StageDef {
            stage: Stage::Patch,
            label: "Apply local patches",
            run: patch::run,
        },
        StageDef {
            stage: Stage::Configure,
            label: "Generate board config",
            run: configure::run,
        },
        StageDef {
            stage: Stage::Compile,
            label: "Compile U-Boot",
            run: compile::run,
        },
        StageDef {
            stage: Stage::BootScript,
            label: "Generate boot script image",
            run: boot_script::run,
        },
        StageDef {
            stage: Stage::Publish,
            label: "Publish artifacts",
            run: publish::run,
        },
    ]
}

// ARCH / CROSS_COMPILE / SOURCE_DATE_EPOCH as seen by the U-Boot build system.
pub(crate) fn cross_env(cfg: &BuildConfig, source_date_epoch: i64) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::new();
    envs.insert("ARCH".into(), cfg.board.arch.clone());
    envs.insert("CROSS_COMPILE".into(), cfg.board.cross_compile.clone());
    envs.insert("SOURCE_DATE_EPOCH".into(), source_date_epoch.to_string());
    envs
}

pub(crate) fn apply_command_env(cmd: &mut Command, envs: &BTreeMap<String, String>) {
    for (k, v) in envs {
        cmd.env(k, v);
    }
}

pub(crate) fn describe_epoch(epoch: i64) -> String {
    match chrono::DateTime::from_timestamp(epoch, 0) {
        Some(ts) => format!("{epoch} ({})", ts.format("%Y-%m-%dT%H:%M:%SZ")),
        None => epoch.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_runs_every_stage_once_in_order() {
        let ids: Vec<Stage> = pipeline().iter().map(|d| d.stage).collect();
        assert_eq!(ids, Stage::ALL.to_vec());
    }

    #[test]
    fn cross_env_uses_requested_epoch() {
        let cfg = BuildConfig::default();
        let envs = cross_env(&cfg, 1600000000);
        assert_eq!(envs.get("ARCH").map(String::as_str), Some("arm"));
        assert_eq!(
            envs.get("CROSS_COMPILE").map(String::as_str),
            Some("arm-linux-gnueabihf-")
        );
        assert_eq!(
            envs.get("SOURCE_DATE_EPOCH").map(String::as_str),
            Some("1600000000")
        );
    }

    #[test]
    fn epoch_is_shown_as_utc() {
        assert_eq!(
            describe_epoch(1699647947),
            "1699647947 (2023-11-10T20:25:47Z)"
        );
    }
}
