use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser, ValueEnum};
use std::io::Write;
use std::process::Command;
use tracing_subscriber::EnvFilter;
use zb_agent_core::config::{Config, DEFAULT_CONFIG_PATH};
use zb_agent_core::listing;
use zb_agent_core::operation::BackupPlan;
use zb_agent_core::{Operation, Request, SnapshotName};
use zb_agent_relay::{self as relay, OutputStrategy, Pipeline, RelayMode};
use zb_agent_zfs as zfs;

#[derive(Parser)]
#[command(
    name = "zb-agent",
    about = "Host agent for zfs snapshot backups",
    disable_version_flag = true
)]
#[command(group(
    ArgGroup::new("operation")
        .args(["list", "restore", "delete", "full", "dataset", "version"])
        .multiple(false)
))]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// List filesystems and their snapshots
    #[arg(short = 'l')]
    list: bool,
    /// Receive a stream from stdin into the filesystem
    #[arg(short = 'r')]
    restore: bool,
    /// Target filesystem
    #[arg(short = 'z', value_name = "FS")]
    filesystem: Option<String>,
    /// Destroy the named snapshot of the filesystem
    #[arg(short = 'd', value_name = "SUFFIX")]
    delete: Option<String>,
    /// Full backup at this timestamp
    #[arg(short = 'f', value_name = "TIMESTAMP")]
    full: Option<String>,
    /// Incremental backup from this full backup timestamp (dataset base with -s)
    #[arg(
        short = 'i',
        value_name = "TIMESTAMP",
        conflicts_with_all = ["list", "restore", "delete", "full"]
    )]
    incremental: Option<String>,
    /// Dataset backup at this timestamp
    #[arg(short = 's', value_name = "TIMESTAMP")]
    dataset: Option<String>,
    /// Roll back to this full backup before receiving
    #[arg(short = 'b', value_name = "TIMESTAMP")]
    rollback_base: Option<String>,
    /// Print version and exit
    #[arg(short = 'v')]
    version: bool,
    /// More log output on stderr (repeatable)
    #[arg(short = 'V', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// How the send stream reaches stdout
    #[arg(long, value_enum, default_value_t = RelayArg::Auto)]
    relay: RelayArg,
    /// Rate-observing filter placed after the send command, e.g. pv
    #[arg(long, value_name = "PROGRAM")]
    observer: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RelayArg {
    Auto,
    Direct,
    Fifo,
}

impl From<RelayArg> for RelayMode {
    fn from(arg: RelayArg) -> Self {
        match arg {
            RelayArg::Auto => RelayMode::Auto,
            RelayArg::Direct => RelayMode::Direct,
            RelayArg::Fifo => RelayMode::Fifo,
        }
    }
}

impl Cli {
    fn request(&self) -> Request {
        Request {
            filesystem: self.filesystem.clone(),
            list: self.list,
            restore: self.restore,
            delete: self.delete.clone(),
            full: self.full.clone(),
            incremental: self.incremental.clone(),
            dataset: self.dataset.clone(),
            rollback_base: self.rollback_base.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the backup stream, so logs go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<i32> {
    if cli.version {
        println!("zb-agent {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let operation = Operation::from_request(&cli.request())?;
    match operation {
        Operation::List => list(&cli.config),
        Operation::Backup(plan) => {
            let strategy = relay::select(cli.relay.into());
            tracing::debug!(strategy = strategy.name(), "selected output strategy");
            backup(&plan, strategy.as_ref(), cli.observer.as_deref())
        }
        Operation::Delete { snapshot } => delete(&snapshot),
        Operation::Restore {
            filesystem,
            rollback_to,
        } => restore(&filesystem, rollback_to.as_ref()),
    }
}

fn list(config_path: &str) -> Result<i32> {
    let cfg = Config::load(config_path).with_context(|| format!("config at {config_path}"))?;
    let entries = zfs::list_entries()?;
    let active_be = if cfg.exclude_inactive_be {
        zfs::active_boot_environment()?
    } else {
        None
    };
    let report = listing::render(&listing::collect(&entries, &cfg, active_be.as_deref()));
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(report.as_bytes())
        .and_then(|_| stdout.flush())
        .context("failed to write listing")?;
    Ok(0)
}

fn backup(plan: &BackupPlan, strategy: &dyn OutputStrategy, observer: Option<&str>) -> Result<i32> {
    // The snapshot has to exist before send reads it.
    zfs::snapshot(&plan.snapshot)?;

    let pipeline = Pipeline::new(zfs::send_command(&plan.send)).with_observer(observer.map(Command::new));
    let label = format!("{}.{}", plan.snapshot.filesystem, plan.kind.tag());
    let code = strategy.deliver(pipeline, &label)?;
    if code != 0 {
        // The snapshot stays; the coordinator decides what to do with it.
        tracing::warn!(snapshot = %plan.snapshot, code, "send did not complete");
    }
    Ok(code)
}

fn delete(snapshot: &SnapshotName) -> Result<i32> {
    let status = zfs::destroy(snapshot)?;
    Ok(relay::exit_code(status))
}

fn restore(filesystem: &str, rollback_to: Option<&SnapshotName>) -> Result<i32> {
    if let Some(base) = rollback_to {
        if let Err(err) = zfs::unmount(filesystem) {
            tracing::warn!("unmount before rollback failed: {err:#}");
        }
        if let Err(err) = zfs::rollback(base) {
            tracing::warn!("rollback failed: {err:#}");
        }
    }
    relay::hand_off(zfs::receive_command(filesystem))
}
