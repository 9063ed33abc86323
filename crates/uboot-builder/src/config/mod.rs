use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_REPO: &str = "https://github.com/u-boot/u-boot";
pub const DEFAULT_REV: &str = "da2e3196e4dc28298b58a018ace07f85eecd1652";
pub const DEFAULT_SOURCE_DATE_EPOCH: i64 = 1699647947;
pub const DEFAULT_BOOT_SCRIPT_DATE_EPOCH: i64 = 1600000000;

const KNOWN_TABLES: &[&str] = &[
    "source",
    "board",
    "patches",
    "boot_script",
    "workspace",
    "output",
    "tools",
];

/// A loaded TOML document with `extends` already applied.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("<defaults>"),
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("failed to deserialize config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }

    pub fn top_level_keys(&self) -> Vec<&str> {
        self.value
            .as_table()
            .map(|t| t.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Pinned upstream snapshot plus the git transfer guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub repo: String,
    pub rev: String,
    pub source_date_epoch: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_http_low_speed_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_http_low_speed_time: Option<u32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo: DEFAULT_REPO.into(),
            rev: DEFAULT_REV.into(),
            source_date_epoch: DEFAULT_SOURCE_DATE_EPOCH,
            git_http_low_speed_limit: Some(1024),
            git_http_low_speed_time: Some(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub arch: String,
    pub cross_compile: String,
    pub defconfig: String,
    pub target: String,
    // u-boot began failing to boot around 13819f07ea6c; CONFIG_BOARD_LATE_INIT probes
    // CROS_EC, which the HC2 does not have.
    pub config_overrides: Vec<String>,
    /// 0 = one job per host CPU.
    pub jobs: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            arch: "arm".into(),
            cross_compile: "arm-linux-gnueabihf-".into(),
            defconfig: "odroid-xu3_defconfig".into(),
            target: "u-boot.bin".into(),
            config_overrides: vec![
                "CONFIG_CMD_SETEXPR=y".into(),
                "CMD_SETEXPR_FMT=y".into(),
                "CONFIG_BOARD_LATE_INIT=n".into(),
            ],
            jobs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchesConfig {
    pub dir: String,
    pub extension: String,
    pub strip: u32,
}

impl Default for PatchesConfig {
    fn default() -> Self {
        Self {
            dir: ".".into(),
            extension: "patch".into(),
            strip: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootScriptConfig {
    pub input: String,
    pub output: String,
    /// Relative paths are resolved against the source tree.
    pub mkimage: String,
    pub name: String,
    pub arch: String,
    pub os: String,
    pub image_type: String,
    pub compression: String,
    pub load_address: String,
    pub entry_address: String,
    pub source_date_epoch: i64,
}

impl Default for BootScriptConfig {
    fn default() -> Self {
        Self {
            input: "boot.cmd".into(),
            output: "boot.scr".into(),
            mkimage: "tools/mkimage".into(),
            name: "Gokrazy Boot Script".into(),
            arch: "arm".into(),
            os: "linux".into(),
            image_type: "script".into(),
            compression: "none".into(),
            load_address: "0".into(),
            entry_address: "0".into(),
            source_date_epoch: DEFAULT_BOOT_SCRIPT_DATE_EPOCH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            prefix: "u-boot".into(),
            parent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "/tmp/buildresult".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub git: String,
    pub make: String,
    pub patch: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: "git".into(),
            make: "make".into(),
            patch: "patch".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub source: SourceConfig,
    pub board: BoardConfig,
    pub patches: PatchesConfig,
    pub boot_script: BootScriptConfig,
    pub workspace: WorkspaceConfig,
    pub output: OutputConfig,
    pub tools: ToolsConfig,
}

impl BuildConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        for key in doc.top_level_keys() {
            if !KNOWN_TABLES.contains(&key) {
                return Err(Error::msg(format!(
                    "config key '{}' in {} is not supported; expected one of: {}",
                    key,
                    doc.path.display(),
                    KNOWN_TABLES.join(", ")
                )));
            }
        }
        let cfg: BuildConfig = doc.deserialize_path("")?.unwrap_or_default();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `path` when given, otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_doc(&load(p)?),
            None => Self::from_doc(&ConfigDoc::empty()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let rev_re = Regex::new(r"^([0-9a-f]{40}|[0-9a-f]{64})$")
            .map_err(|e| Error::msg(format!("invalid rev pattern: {e}")))?;
        if !rev_re.is_match(&self.source.rev) {
            return Err(Error::msg(format!(
                "source.rev '{}' must be a full-length lowercase hex commit id",
                self.source.rev
            )));
        }

        for (key, val) in [
            ("source.repo", &self.source.repo),
            ("board.arch", &self.board.arch),
            ("board.defconfig", &self.board.defconfig),
            ("board.target", &self.board.target),
            ("boot_script.input", &self.boot_script.input),
            ("boot_script.mkimage", &self.boot_script.mkimage),
            ("output.dir", &self.output.dir),
            ("tools.git", &self.tools.git),
            ("tools.make", &self.tools.make),
            ("tools.patch", &self.tools.patch),
        ] {
            if val.trim().is_empty() {
                return Err(Error::msg(format!("{key} must not be empty")));
            }
        }

        // These reach argv verbatim, so padding would only surface as a tool error.
        for (key, val) in [
            ("source.repo", &self.source.repo),
            ("board.arch", &self.board.arch),
            ("board.cross_compile", &self.board.cross_compile),
            ("board.defconfig", &self.board.defconfig),
            ("board.target", &self.board.target),
            ("patches.extension", &self.patches.extension),
            ("boot_script.output", &self.boot_script.output),
        ] {
            if val.trim() != val.as_str() {
                return Err(Error::msg(format!(
                    "{key} '{val}' must not have leading or trailing whitespace"
                )));
            }
        }

        let override_re = Regex::new(r"^[A-Za-z0-9_]+=")
            .map_err(|e| Error::msg(format!("invalid override pattern: {e}")))?;
        for line in &self.board.config_overrides {
            if line.contains('\n') || !override_re.is_match(line) {
                return Err(Error::msg(format!(
                    "board.config_overrides entry '{}' is not a single KEY=VALUE line",
                    line
                )));
            }
        }

        let ext = self.patches.extension.as_str();
        if ext.is_empty() || ext.starts_with('.') {
            return Err(Error::msg(format!(
                "patches.extension '{}' must be non-empty and given without a leading dot",
                self.patches.extension
            )));
        }

        validate_file_name("board.target", &self.board.target)?;
        validate_file_name("boot_script.output", &self.boot_script.output)?;
        if self.board.target == self.boot_script.output {
            return Err(Error::msg(
                "board.target and boot_script.output must name different files",
            ));
        }
        Ok(())
    }
}

// Artifacts are published under their file name, so they must not carry directories.
fn validate_file_name(key: &str, raw: &str) -> Result<()> {
    let mut comps = Path::new(raw).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::msg(format!(
            "{key} '{}' must be a plain file name",
            raw
        ))),
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn load_value_inner(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    let parent = value
        .as_table_mut()
        .and_then(|tbl| tbl.remove("extends"));
    if let Some(parent) = parent {
        let Some(rel) = parent.as_str() else {
            return Err(Error::msg(format!(
                "invalid extends in {} (expected string)",
                path.display()
            )));
        };
        let base_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(rel.trim());
        out = load_value_inner(&base_path, seen)?;
    }
    merge_values(&mut out, value);

    seen.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut seen)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}
