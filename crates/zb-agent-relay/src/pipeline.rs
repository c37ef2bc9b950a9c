use anyhow::{anyhow, Context, Result};
use std::process::{Child, Command, ExitStatus, Stdio};

/// The data-producing side of a backup: the send command, optionally
/// followed by a rate-observing filter reading from it.
pub struct Pipeline {
    producer: Command,
    observer: Option<Command>,
}

pub(crate) struct Running {
    producer: Child,
    observer: Option<Child>,
}

impl Pipeline {
    pub fn new(producer: Command) -> Self {
        Self {
            producer,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<Command>) -> Self {
        self.observer = observer;
        self
    }

    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    /// Splits into the command whose stdout is the final output and, when an
    /// observer is present, the already running producer feeding it.
    pub(crate) fn into_last_stage(self) -> Result<(Command, Option<Child>)> {
        match self.observer {
            None => Ok((self.producer, None)),
            Some(mut observer) => {
                let mut producer = self.producer;
                let mut child = producer
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .spawn()
                    .context("failed to start send")?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("failed to capture send stdout"))?;
                observer.stdin(Stdio::from(stdout));
                Ok((observer, Some(child)))
            }
        }
    }

    /// Starts every stage with the last one writing to `output`. The commands
    /// are dropped on return so no copy of `output` stays open here.
    pub(crate) fn spawn(self, output: Stdio) -> Result<Running> {
        let (mut last, producer) = self.into_last_stage()?;
        let last = last
            .stdout(output)
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to start output stage")?;
        Ok(match producer {
            Some(producer) => Running {
                producer,
                observer: Some(last),
            },
            None => Running {
                producer: last,
                observer: None,
            },
        })
    }
}

impl Running {
    /// Collects every stage. A failing producer takes precedence over a
    /// failing observer.
    pub(crate) fn wait(mut self) -> Result<ExitStatus> {
        let observer_status = match self.observer.as_mut() {
            Some(child) => Some(child.wait().context("failed to wait on observer")?),
            None => None,
        };
        let producer_status = self.producer.wait().context("failed to wait on send")?;
        if !producer_status.success() {
            return Ok(producer_status);
        }
        Ok(observer_status.unwrap_or(producer_status))
    }

    /// Stops every stage and reaps it. Used when the output side has gone
    /// away and the stream can no longer be delivered.
    pub(crate) fn abort(mut self) -> Result<ExitStatus> {
        for child in self.observer.iter_mut().chain(std::iter::once(&mut self.producer)) {
            // Already exited is fine; wait below still collects it.
            let _ = child.kill();
        }
        self.wait()
    }
}
