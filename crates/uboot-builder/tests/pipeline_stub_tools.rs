#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use uboot_builder::config::BuildConfig;
use uboot_builder::executor::{ExecCtx, StdoutSink, execute_pipeline};
use uboot_builder::stages::{Stage, pipeline};

// Freshly written stub executables can hit ETXTBSY if another test forks
// while one is still open for writing; run these one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

struct Fixture {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    log: PathBuf,
    config: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();
        let log = root.join("calls.log");
        for d in ["bin", "inv", "out", "ws"] {
            fs::create_dir_all(root.join(d)).expect("mkdir");
        }
        fs::write(root.join("inv/boot.cmd"), "bootz 0x40008000 - 0x42000000\n")
            .expect("write boot.cmd");
        fs::write(&log, "").expect("write log");

        let log_s = log.display();
        write_script(
            &root.join("bin/git"),
            &format!("echo \"git $*\" >> {log_s}\n"),
        );
        write_script(
            &root.join("bin/patch"),
            &format!(
                "content=$(cat)\n\
                 echo \"patch $* $content\" >> {log_s}\n\
                 case \"$content\" in *FAIL*) echo '1 out of 1 hunk FAILED' >&2; exit 1;; esac\n"
            ),
        );
        write_script(
            &root.join("bin/make"),
            &format!(
                "echo \"make $* SDE=$SOURCE_DATE_EPOCH CC=$CROSS_COMPILE ARCH=$ARCH\" >> {log_s}\n\
                 case \"$1\" in\n\
                   ARCH=*) printf 'CONFIG_ARM=y\\nCONFIG_BOARD_LATE_INIT=y\\n' > .config ;;\n\
                   u-boot.bin) printf 'uboot-binary' > u-boot.bin; chmod 0751 u-boot.bin ;;\n\
                 esac\n"
            ),
        );
        write_script(
            &root.join("bin/mkimage"),
            &format!(
                "echo \"mkimage SDE=$SOURCE_DATE_EPOCH CC=$CROSS_COMPILE ARCH=$ARCH $*\" >> {log_s}\n\
                 while [ $# -gt 1 ]; do\n\
                   if [ \"$1\" = \"-d\" ]; then in=\"$2\"; fi\n\
                   shift\n\
                 done\n\
                 cp \"$in\" \"$1\"\n\
                 chmod 0640 \"$1\"\n"
            ),
        );

        let config = root.join("build.toml");
        let bin = root.join("bin");
        fs::write(
            &config,
            format!(
                r#"
[board]
jobs = 2

[workspace]
parent = "{ws}"

[output]
dir = "{out}"

[tools]
git = "{bin}/git"
make = "{bin}/make"
patch = "{bin}/patch"

[boot_script]
mkimage = "{bin}/mkimage"
"#,
                ws = root.join("ws").display(),
                out = root.join("out").display(),
                bin = bin.display(),
            ),
        )
        .expect("write config");

        Self {
            _tmp: tmp,
            root,
            log,
            config,
        }
    }

    fn inv(&self) -> PathBuf {
        self.root.join("inv")
    }

    fn out(&self) -> PathBuf {
        self.root.join("out")
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .expect("read log")
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn workspace(&self) -> PathBuf {
        let mut dirs: Vec<PathBuf> = fs::read_dir(self.root.join("ws"))
            .expect("list ws")
            .map(|e| e.expect("entry").path())
            .collect();
        assert_eq!(dirs.len(), 1, "exactly one workspace per run");
        dirs.remove(0)
    }

    fn run(&self, dry_run: bool) -> uboot_builder::Result<()> {
        let cfg = BuildConfig::load(Some(&self.config)).expect("load config");
        let mut ctx = ExecCtx::new(dry_run, Arc::new(StdoutSink::default()));
        ctx.set_invocation_dir(self.inv());
        execute_pipeline(&cfg, &pipeline(), &mut ctx)
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

fn mode(path: &Path) -> u32 {
    fs::metadata(path).expect("stat").permissions().mode() & 0o7777
}

#[test]
fn full_run_without_patches_publishes_two_artifacts() {
    let _guard = serial();
    let fx = Fixture::new();

    fx.run(false).expect("pipeline succeeds");

    let mut published: Vec<String> = fs::read_dir(fx.out())
        .expect("list out")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    published.sort();
    assert_eq!(published, vec!["boot.scr", "u-boot.bin"]);

    let ws = fx.workspace();
    for name in ["u-boot.bin", "boot.scr"] {
        assert_eq!(
            fs::read(fx.out().join(name)).expect("read published"),
            fs::read(ws.join(name)).expect("read original"),
            "{name} bytes"
        );
        assert_eq!(mode(&fx.out().join(name)), mode(&ws.join(name)), "{name} mode");
    }
    assert_eq!(mode(&fx.out().join("u-boot.bin")), 0o751);
    assert_eq!(
        fs::read_to_string(fx.out().join("boot.scr")).expect("read boot.scr"),
        "bootz 0x40008000 - 0x42000000\n"
    );

    let config = fs::read_to_string(ws.join(".config")).expect("read .config");
    assert_eq!(
        config,
        "CONFIG_ARM=y\nCONFIG_BOARD_LATE_INIT=y\n\
         CONFIG_CMD_SETEXPR=y\nCMD_SETEXPR_FMT=y\nCONFIG_BOARD_LATE_INIT=n\n"
    );

    let calls = fx.calls();
    assert_eq!(calls[0], "git init");
    assert_eq!(
        calls[1],
        "git remote add origin https://github.com/u-boot/u-boot"
    );
    assert_eq!(
        calls[2],
        "git fetch --depth=1 origin da2e3196e4dc28298b58a018ace07f85eecd1652"
    );
    assert_eq!(calls[3], "git checkout FETCH_HEAD");
    assert!(calls[4].starts_with("make ARCH=arm odroid-xu3_defconfig"));
    assert_eq!(
        calls[5],
        "make u-boot.bin -j2 SDE=1699647947 CC=arm-linux-gnueabihf- ARCH=arm"
    );
    assert!(
        calls[6].starts_with(
            "mkimage SDE=1600000000 CC=arm-linux-gnueabihf- ARCH=arm -A arm -O linux -T script"
        ),
        "unexpected mkimage call: {}",
        calls[6]
    );
    assert!(calls[6].ends_with(&format!(
        "-d {} boot.scr",
        fx.inv().join("boot.cmd").display()
    )));
    assert_eq!(calls.len(), 7);
}

#[test]
fn patches_are_applied_in_file_name_order() {
    let _guard = serial();
    let fx = Fixture::new();
    fs::write(fx.inv().join("0002-second.patch"), "second").expect("write patch");
    fs::write(fx.inv().join("0001-first.patch"), "first").expect("write patch");
    fs::write(fx.inv().join("README"), "not a patch").expect("write readme");

    fx.run(false).expect("pipeline succeeds");

    let patch_calls: Vec<String> = fx
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("patch "))
        .collect();
    assert_eq!(patch_calls, vec!["patch -p1 first", "patch -p1 second"]);
}

#[test]
fn failing_patch_stops_before_any_build_step() {
    let _guard = serial();
    let fx = Fixture::new();
    fs::write(fx.inv().join("0001-ok.patch"), "ok").expect("write patch");
    fs::write(fx.inv().join("0002-bad.patch"), "FAIL").expect("write patch");
    fs::write(fx.inv().join("0003-later.patch"), "later").expect("write patch");

    let err = fx.run(false).expect_err("pipeline must fail");
    assert_eq!(err.stage(), Some(Stage::Patch));
    assert!(err.to_string().contains("0002-bad.patch"), "err: {err}");

    let calls = fx.calls();
    assert!(!calls.iter().any(|c| c.starts_with("make")), "calls: {calls:?}");
    assert!(!calls.iter().any(|c| c.contains("later")), "calls: {calls:?}");
    assert_eq!(
        fs::read_dir(fx.out()).expect("list out").count(),
        0,
        "nothing is published"
    );
}

#[test]
fn missing_output_dir_fails_in_publish_stage() {
    let _guard = serial();
    let fx = Fixture::new();
    fs::remove_dir(fx.out()).expect("remove out");

    let err = fx.run(false).expect_err("pipeline must fail");
    assert_eq!(err.stage(), Some(Stage::Publish));
    assert!(!fx.out().exists(), "output dir must not be created");
}

#[test]
fn dry_run_spawns_nothing_and_publishes_nothing() {
    let _guard = serial();
    let fx = Fixture::new();

    fx.run(true).expect("dry run succeeds");

    assert!(fx.calls().is_empty());
    assert_eq!(fs::read_dir(fx.out()).expect("list out").count(), 0);
}

#[test]
fn missing_boot_cmd_fails_in_workspace_stage() {
    let _guard = serial();
    let fx = Fixture::new();
    fs::remove_file(fx.inv().join("boot.cmd")).expect("remove boot.cmd");

    let err = fx.run(false).expect_err("pipeline must fail");
    assert_eq!(err.stage(), Some(Stage::Workspace));
    assert!(fx.calls().is_empty());
}
