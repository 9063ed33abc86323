use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_line;
use crate::stages::StageDef;
use crate::workspace::BuildPaths;

/// Which of the child's streams a relayed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    StageStarted {
        id: String,
    },
    StageLog {
        id: String,
        stream: LogStream,
        line: String,
    },
    StageFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    PipelineDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

/// Prints stage lifecycle and relayed child output as it happens. Lines a
/// child wrote to stderr go to our stderr.
#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    stages_started: usize,
    stages_ok: usize,
    failed_stage: Option<String>,
    log_lines: usize,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::StageStarted { id } => {
                if let Ok(mut s) = self.state.lock() {
                    s.stages_started = s.stages_started.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("RUN: {id}");
            }
            ExecEvent::StageLog { id, stream, line } => {
                if let Ok(mut s) = self.state.lock() {
                    s.log_lines = s.log_lines.saturating_add(1);
                }
                match stream {
                    LogStream::Stdout => println!("[{id}] {line}"),
                    LogStream::Stderr => eprintln!("[{id}] {line}"),
                }
            }
            ExecEvent::StageFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.stages_ok = s.stages_ok.saturating_add(1);
                    } else {
                        s.failed_stage = Some(id.clone());
                    }
                }
                if ok {
                    println!("DONE: {id} ({elapsed_ms}ms)");
                } else {
                    println!(
                        "FAIL: {id} ({elapsed_ms}ms) {}",
                        error.unwrap_or_default()
                    );
                }
            }
            ExecEvent::PipelineDone { ok, error } => {
                let Ok(mut s) = self.state.lock() else {
                    return;
                };
                let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                let mut summary = String::from("SUMMARY:\n");
                summary.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                summary.push_str(&format!(
                    "  stages: started={} ok={}\n",
                    s.stages_started, s.stages_ok
                ));
                if let Some(failed) = s.failed_stage.as_deref() {
                    summary.push_str(&format!("  failed_stage: {failed}\n"));
                }
                summary.push_str(&format!("  logs: {}\n", s.log_lines));
                summary.push_str(&format!(
                    "  elapsed: {}\n",
                    format_elapsed_hms(wall.as_secs())
                ));
                if let Some(e) = error.filter(|_| !ok) {
                    summary.push_str(&format!("  error: {e}\n"));
                }
                *s = StdoutSinkState::default();
                print!("{summary}");
            }
        }
    }
}

pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_stage: Option<String>,
    invocation_dir: Option<PathBuf>,
    paths: Option<BuildPaths>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_stage: None,
            invocation_dir: None,
            paths: None,
        }
    }

    // Directory holding boot.cmd and the patch files; defaults to the process cwd.
    pub fn set_invocation_dir(&mut self, dir: PathBuf) {
        self.invocation_dir = Some(dir);
    }

    pub fn invocation_dir(&self) -> Option<&Path> {
        self.invocation_dir.as_deref()
    }

    pub fn set_stage(&mut self, id: impl Into<String>) {
        self.current_stage = Some(id.into());
    }

    pub fn set_paths(&mut self, paths: BuildPaths) {
        self.paths = Some(paths);
    }

    pub fn paths(&self) -> Result<&BuildPaths> {
        self.paths
            .as_ref()
            .ok_or_else(|| Error::msg("workspace has not been prepared"))
    }

    pub fn log(&self, msg: &str) {
        self.log_to(LogStream::Stdout, msg);
    }

    fn log_to(&self, stream: LogStream, msg: &str) {
        let id = self
            .current_stage
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::StageLog {
            id,
            stream,
            line: msg.to_string(),
        });
    }

    pub fn run_cmd(&self, cmd: Command) -> Result<()> {
        self.run_cmd_with_stdin(cmd, Stdio::null())
    }

    /// Runs `cmd` to completion, relaying its stdout and stderr line by line to
    /// the matching stream of the sink. The exit status is the only success
    /// signal.
    pub fn run_cmd_with_stdin(&self, mut cmd: Command, stdin: Stdio) -> Result<()> {
        let desc = describe_cmd(&cmd);
        if self.dry_run {
            self.log(&format!("DRY-RUN: {desc}"));
            return Ok(());
        }
        tracing::debug!(command = %desc, cwd = ?cmd.get_current_dir(), "spawning");

        let mut child = cmd
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to spawn '{desc}': {e}")))?;

        let (tx, rx) = mpsc::channel::<(LogStream, String)>();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(std::thread::spawn(move || {
                read_output_stream(out, LogStream::Stdout, tx)
            }));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(std::thread::spawn(move || {
                read_output_stream(err, LogStream::Stderr, tx)
            }));
        }
        drop(tx);

        for (stream, line) in rx {
            let line = sanitize_line(&line);
            if !line.is_empty() {
                self.log_to(stream, &line);
            }
        }
        for r in readers {
            let _ = r.join();
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait for '{desc}' failed: {e}")))?;
        if !status.success() {
            return Err(Error::msg(format!("'{desc}' failed: {status}")));
        }
        Ok(())
    }
}

pub fn describe_cmd(cmd: &Command) -> String {
    let mut out = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        let arg = arg.to_string_lossy();
        out.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            out.push_str(&format!("{arg:?}"));
        } else {
            out.push_str(&arg);
        }
    }
    out
}

/// Runs the stages in order. The first failure stops the pipeline and comes
/// back tagged with the stage that produced it.
pub fn execute_pipeline(
    cfg: &BuildConfig,
    stages: &[StageDef],
    ctx: &mut ExecCtx,
) -> Result<()> {
    for def in stages {
        let id = def.stage.id();
        ctx.sink.emit(ExecEvent::StageStarted { id: id.into() });
        ctx.set_stage(id);
        tracing::info!(stage = id, "{}", def.label);

        let start = Instant::now();
        let res = (def.run)(cfg, ctx);
        let elapsed_ms = start.elapsed().as_millis();
        match res {
            Ok(()) => ctx.sink.emit(ExecEvent::StageFinished {
                id: id.into(),
                ok: true,
                error: None,
                elapsed_ms,
            }),
            Err(e) => {
                let e = e.in_stage(def.stage);
                ctx.sink.emit(ExecEvent::StageFinished {
                    id: id.into(),
                    ok: false,
                    error: Some(e.message().to_string()),
                    elapsed_ms,
                });
                ctx.sink.emit(ExecEvent::PipelineDone {
                    ok: false,
                    error: Some(e.to_string()),
                });
                return Err(e);
            }
        }
    }
    ctx.sink.emit(ExecEvent::PipelineDone {
        ok: true,
        error: None,
    });
    Ok(())
}

fn read_output_stream<R: Read>(
    reader: R,
    stream: LogStream,
    tx: mpsc::Sender<(LogStream, String)>,
) {
    // Bounds memory for output that never emits a newline; such a line is
    // split, not dropped.
    const MAX_PENDING_BYTES: usize = 1024 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    let flush = |pending: &mut Vec<u8>| {
        if pending.is_empty() {
            return true;
        }
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        tx.send((stream, line)).is_ok()
    };

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            // git progress uses bare carriage returns; treat them as line ends.
            if b == b'\n' || b == b'\r' {
                if !flush(&mut pending) {
                    return;
                }
            } else {
                pending.push(b);
                if pending.len() >= MAX_PENDING_BYTES && !flush(&mut pending) {
                    return;
                }
            }
        }
    }
    flush(&mut pending);
}

pub fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
