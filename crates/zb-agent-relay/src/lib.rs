//! Getting a backup stream from the send command to the coordinator.
//!
//! Two strategies exist. [`DirectHandoff`] lets the send command take over
//! the agent process so it writes straight to the inherited stdout.
//! [`FifoBridge`] keeps the agent alive and copies the stream through a
//! named pipe, for platforms where the inherited stdout cannot be handed to
//! a child as-is.

mod direct;
#[cfg(unix)]
mod fifo;
mod pipeline;

pub use direct::{hand_off, DirectHandoff};
#[cfg(unix)]
pub use fifo::{FifoBridge, CHUNK_SIZE};
pub use pipeline::Pipeline;

use anyhow::Result;
use std::process::ExitStatus;

pub trait OutputStrategy {
    fn name(&self) -> &'static str;

    /// Streams the pipeline output to stdout and returns the exit code the
    /// agent should finish with. `label` identifies the operation and is
    /// used to name any temporary objects.
    fn deliver(&self, pipeline: Pipeline, label: &str) -> Result<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    #[default]
    Auto,
    Direct,
    Fifo,
}

pub fn platform_needs_fifo() -> bool {
    cfg!(any(target_os = "solaris", target_os = "illumos"))
}

/// Chooses the strategy once, at startup.
pub fn select(mode: RelayMode) -> Box<dyn OutputStrategy> {
    let use_fifo = match mode {
        RelayMode::Auto => platform_needs_fifo(),
        RelayMode::Direct => false,
        RelayMode::Fifo => true,
    };
    match fifo_strategy() {
        Some(fifo) if use_fifo => fifo,
        _ => Box::new(DirectHandoff),
    }
}

#[cfg(unix)]
fn fifo_strategy() -> Option<Box<dyn OutputStrategy>> {
    Some(Box::new(FifoBridge::default()))
}

#[cfg(not(unix))]
fn fifo_strategy() -> Option<Box<dyn OutputStrategy>> {
    None
}

/// Exit code for a finished child, following the shell's 128+signal rule.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| signal_of(status).map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> Option<i32> {
    None
}
