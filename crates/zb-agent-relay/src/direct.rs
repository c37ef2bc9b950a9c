use crate::pipeline::Pipeline;
use crate::{exit_code, OutputStrategy};
use anyhow::Result;
use std::process::{Command, Stdio};

/// The last pipeline stage takes over this process; stdout is inherited.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectHandoff;

impl OutputStrategy for DirectHandoff {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn deliver(&self, pipeline: Pipeline, _label: &str) -> Result<i32> {
        // Exec'ing into the observer would lose the send status, so a
        // two-stage pipeline runs as children writing to the inherited stdout.
        if pipeline.has_observer() {
            let status = pipeline.spawn(Stdio::inherit())?.wait()?;
            return Ok(exit_code(status));
        }
        let (last, _) = pipeline.into_last_stage()?;
        hand_off(last)
    }
}

/// Replaces the current process image with `cmd`. Only returns on failure.
#[cfg(unix)]
pub fn hand_off(mut cmd: Command) -> Result<i32> {
    use anyhow::Context;
    use std::os::unix::process::CommandExt;

    tracing::debug!(program = ?cmd.get_program(), "exec");
    let err = cmd.exec();
    Err(err).with_context(|| format!("failed to exec {:?}", cmd.get_program()))
}

/// Without exec the command runs as a child with inherited stdio and its
/// exit code becomes ours.
#[cfg(not(unix))]
pub fn hand_off(mut cmd: Command) -> Result<i32> {
    use anyhow::Context;

    let status = cmd
        .status()
        .with_context(|| format!("failed to run {:?}", cmd.get_program()))?;
    Ok(crate::exit_code(status))
}
