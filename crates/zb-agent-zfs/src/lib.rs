use anyhow::{anyhow, Context, Result};
use std::process::{Command, ExitStatus, Stdio};
use zb_agent_core::listing::ListEntry;
use zb_agent_core::operation::SendSpec;
use zb_agent_core::SnapshotName;

pub const EXCLUDE_PROPERTY: &str = "com.omniti.labs.zetaback:exclude";
pub const CLASS_PROPERTY: &str = "com.omniti.labs.zetaback:class";
pub const PARENT_BE_PROPERTY: &str = "org.opensolaris.libbe:parentbe";
pub const BE_UUID_PROPERTY: &str = "org.opensolaris.libbe:uuid";

fn zfs(args: &[&str]) -> Command {
    tracing::debug!(?args, "zfs");
    let mut cmd = Command::new("zfs");
    cmd.args(args);
    cmd
}

fn run_zfs(args: &[&str]) -> Result<()> {
    let status = zfs(args)
        .status()
        .with_context(|| format!("failed to run zfs {args:?}"))?;
    if !status.success() {
        return Err(anyhow!("zfs {args:?} failed with {status}"));
    }
    Ok(())
}

/// Every filesystem, volume and snapshot with the properties the listing
/// report needs, in engine order.
pub fn list_entries() -> Result<Vec<ListEntry>> {
    let columns = [
        "name",
        EXCLUDE_PROPERTY,
        CLASS_PROPERTY,
        PARENT_BE_PROPERTY,
        BE_UUID_PROPERTY,
    ]
    .join(",");
    let output = zfs(&["list", "-H", "-o", columns.as_str(), "-t", "filesystem,volume,snapshot"])
        .stderr(Stdio::inherit())
        .output()
        .context("failed to run zfs list")?;
    if !output.status.success() {
        return Err(anyhow!("zfs list failed with {}", output.status));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().filter_map(ListEntry::parse_line).collect())
}

/// UUID of the boot environment that is running now, if `beadm` reports one.
pub fn active_boot_environment() -> Result<Option<String>> {
    tracing::debug!("beadm list -H");
    let output = Command::new("beadm")
        .args(["list", "-H"])
        .stderr(Stdio::inherit())
        .output()
        .context("failed to run beadm list")?;
    if !output.status.success() {
        return Err(anyhow!("beadm list failed with {}", output.status));
    }
    Ok(parse_active_be(&String::from_utf8_lossy(&output.stdout)))
}

/// Rows look like `name;uuid;active;mountpoint;space;policy;created`; the
/// active column carries `N` for the environment booted now.
pub fn parse_active_be(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut cols = line.split(';');
        let _name = cols.next()?;
        let uuid = cols.next()?;
        let active = cols.next()?;
        (active.contains('N') && !uuid.is_empty()).then(|| uuid.to_string())
    })
}

pub fn snapshot(name: &SnapshotName) -> Result<()> {
    let name = name.to_string();
    run_zfs(&["snapshot", name.as_str()])?;
    tracing::info!(snapshot = %name, "created snapshot");
    Ok(())
}

pub fn send_args(spec: &SendSpec) -> Vec<String> {
    match spec {
        SendSpec::Full { target } => vec!["send".into(), target.to_string()],
        SendSpec::Incremental { base, target } => {
            vec!["send".into(), "-i".into(), base.to_string(), target.to_string()]
        }
        SendSpec::Intermediary { base, target } => {
            vec!["send".into(), "-I".into(), base.to_string(), target.to_string()]
        }
    }
}

/// The send command, not yet started. Its stdout is wired by the caller.
pub fn send_command(spec: &SendSpec) -> Command {
    let args = send_args(spec);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    zfs(&args)
}

/// Runs `zfs destroy` and hands back its status; a failed destroy is not an
/// agent error, its exit code is passed through.
pub fn destroy(name: &SnapshotName) -> Result<ExitStatus> {
    let name = name.to_string();
    let status = zfs(&["destroy", name.as_str()])
        .status()
        .with_context(|| format!("failed to run zfs destroy {name}"))?;
    if status.success() {
        tracing::info!(snapshot = %name, "destroyed snapshot");
    } else {
        tracing::warn!(snapshot = %name, %status, "zfs destroy failed");
    }
    Ok(status)
}

pub fn unmount(filesystem: &str) -> Result<()> {
    run_zfs(&["unmount", filesystem])
}

pub fn rollback(name: &SnapshotName) -> Result<()> {
    let name = name.to_string();
    run_zfs(&["rollback", name.as_str()])?;
    tracing::info!(snapshot = %name, "rolled back");
    Ok(())
}

/// The receive command. Stdin is left inherited.
pub fn receive_command(filesystem: &str) -> Command {
    zfs(&["recv", filesystem])
}
