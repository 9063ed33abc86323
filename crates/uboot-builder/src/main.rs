use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uboot_builder::Result;
use uboot_builder::config::BuildConfig;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log output format for diagnostics on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch, patch, configure and build U-Boot, then publish the artifacts
    Run {
        /// Build definition TOML (built-in defaults when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory holding boot.cmd and *.patch (default: current dir)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Print what would run without executing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the ordered pipeline stages
    Plan {
        /// Build definition TOML (built-in defaults when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the fully-resolved configuration (after extends and defaults)
    Resolve {
        /// Build definition TOML (built-in defaults when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    let res = match args.cmd {
        Command::Run {
            config,
            dir,
            dry_run,
        } => cmd_run(config.as_deref(), dir, dry_run),
        Command::Plan { config, json } => cmd_plan(config.as_deref(), json),
        Command::Resolve { config } => cmd_resolve(config.as_deref()),
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(stage = ?e.stage(), "{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn cmd_run(config: Option<&Path>, dir: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let cfg = BuildConfig::load(config)?;

    let sink = Arc::new(uboot_builder::executor::StdoutSink::default());
    let mut ctx = uboot_builder::executor::ExecCtx::new(dry_run, sink);
    if let Some(dir) = dir {
        ctx.set_invocation_dir(dir);
    }
    let stages = uboot_builder::stages::pipeline();
    uboot_builder::executor::execute_pipeline(&cfg, &stages, &mut ctx)
}

fn cmd_plan(config: Option<&Path>, json: bool) -> Result<()> {
    // Loaded for validation only; the stage order is fixed.
    BuildConfig::load(config)?;
    let stages = uboot_builder::stages::pipeline();

    if json {
        let list: Vec<serde_json::Value> = stages
            .iter()
            .enumerate()
            .map(|(i, d)| {
                serde_json::json!({
                    "index": i + 1,
                    "stage": d.stage,
                    "label": d.label,
                })
            })
            .collect();
        let s = serde_json::to_string_pretty(&list)
            .map_err(|e| uboot_builder::Error::msg(format!("json encode error: {e}")))?;
        println!("{s}");
        return Ok(());
    }

    for (i, d) in stages.iter().enumerate() {
        println!("{:>2}. {:<12}  {}", i + 1, d.stage.id(), d.label);
    }
    Ok(())
}

fn cmd_resolve(config: Option<&Path>) -> Result<()> {
    let cfg = BuildConfig::load(config)?;
    let s = toml::to_string_pretty(&cfg)
        .map_err(|e| uboot_builder::Error::msg(format!("TOML encode error: {e}")))?;
    print!("{s}");
    Ok(())
}
