//! Named-pipe bridge for platforms where a child cannot write straight to
//! the agent's stdout.
//!
//! The producer writes into a fifo, this process copies from the fifo to
//! its own stdout one chunk at a time, then collects the producer's exit
//! status. The fifo is unlinked as soon as both ends are open, so nothing
//! is left behind in the temp directory if the agent dies mid-stream.

use crate::pipeline::Pipeline;
use crate::{exit_code, OutputStrategy};
use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FifoBridge {
    dir: PathBuf,
}

impl Default for FifoBridge {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

impl OutputStrategy for FifoBridge {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn deliver(&self, pipeline: Pipeline, label: &str) -> Result<i32> {
        let stdout = io::stdout();
        let mut sink = stdout.lock();
        let status = self.relay(pipeline, label, &mut sink)?;
        Ok(exit_code(status))
    }
}

impl FifoBridge {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Unique per process and per operation so concurrent agents never
    /// share a fifo.
    pub fn fifo_path(&self, label: &str) -> PathBuf {
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir
            .join(format!("zb-agent.{}.{}", std::process::id(), label))
    }

    /// Runs `pipeline` with its output going through a fifo and copies every
    /// byte to `sink`. Returns once the stream has ended and every stage has
    /// exited.
    pub fn relay<W: Write>(&self, pipeline: Pipeline, label: &str, sink: &mut W) -> Result<ExitStatus> {
        let path = self.fifo_path(label);
        make_fifo(&path)?;
        let opened = open_ends(&path);
        // Unlink before anything can fail further down.
        let removed = fs::remove_file(&path);
        let (mut reader, writer) = opened?;
        removed.with_context(|| format!("failed to unlink fifo {}", path.display()))?;

        let running = pipeline.spawn(Stdio::from(writer))?;
        let bytes = match copy_chunks(&mut reader, sink) {
            Ok(bytes) => bytes,
            Err(err) => {
                drop(reader);
                let status = running.abort()?;
                tracing::warn!(%status, "relay aborted, producer stopped");
                return Err(err).context("failed to relay stream");
            }
        };
        let status = running.wait()?;
        tracing::info!(bytes, %status, "relay finished");
        Ok(status)
    }
}

fn make_fifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("fifo path contains NUL: {}", path.display()))?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("failed to create fifo {}", path.display()));
    }
    Ok(())
}

/// Opens the read end without blocking, which lets the write end open
/// immediately, then switches the reader back to blocking reads.
fn open_ends(path: &Path) -> Result<(File, File)> {
    let reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("failed to open fifo for reading: {}", path.display()))?;
    let writer = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open fifo for writing: {}", path.display()))?;
    set_blocking(&reader)?;
    Ok((reader, writer))
}

fn set_blocking(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();
    let rc = unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            flags
        } else {
            libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK)
        }
    };
    if rc < 0 {
        return Err(io::Error::last_os_error()).context("failed to make fifo blocking");
    }
    Ok(())
}

fn copy_chunks<R: Read, W: Write>(reader: &mut R, sink: &mut W) -> io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        sink.write_all(&buf[..read])?;
        total += read as u64;
    }
    sink.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    fn relay_file(bytes: &[u8], observer: Option<Command>) -> (Vec<u8>, ExitStatus) {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("input.bin");
        fs::write(&input, bytes).unwrap();
        let mut cat = Command::new("cat");
        cat.arg(&input);
        let bridge = FifoBridge::in_dir(tmp.path());
        let mut out = Vec::new();
        let status = bridge
            .relay(Pipeline::new(cat).with_observer(observer), "pool_fs.full", &mut out)
            .unwrap();
        (out, status)
    }

    #[test]
    fn relays_empty_stream() {
        let (out, status) = relay_file(&[], None);
        assert!(status.success());
        assert!(out.is_empty());
    }

    #[test]
    fn relays_binary_with_nul_bytes() {
        let bytes = b"\0\x01\xffZB\0\0\n\r\x7f".to_vec();
        let (out, status) = relay_file(&bytes, None);
        assert!(status.success());
        assert_eq!(out, bytes);
    }

    #[test]
    fn relays_multi_chunk_stream() {
        let bytes = payload(CHUNK_SIZE * 5 + 123);
        let (out, status) = relay_file(&bytes, None);
        assert!(status.success());
        assert_eq!(out.len(), bytes.len());
        assert_eq!(out, bytes);
    }

    #[test]
    fn relays_through_an_observer() {
        let bytes = payload(CHUNK_SIZE * 2 + 7);
        let (out, status) = relay_file(&bytes, Some(Command::new("cat")));
        assert!(status.success());
        assert_eq!(out, bytes);
    }

    #[test]
    fn reports_producer_failure() {
        let tmp = tempdir().unwrap();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf partial; exit 3"]);
        let mut out = Vec::new();
        let status = FifoBridge::in_dir(tmp.path())
            .relay(Pipeline::new(cmd), "fail", &mut out)
            .unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(out, b"partial");
    }

    struct ClosedSink;

    impl Write for ClosedSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn closed_sink_stops_the_producer() {
        let tmp = tempdir().unwrap();
        let mut producer = Command::new("sh");
        producer.args(["-c", "while :; do printf data; done"]);
        let bridge = FifoBridge::in_dir(tmp.path());

        let err = bridge
            .relay(Pipeline::new(producer), "closed", &mut ClosedSink)
            .unwrap_err();

        assert!(format!("{err:#}").contains("failed to relay stream"));
        assert!(!bridge.fifo_path("closed").exists());
    }

    #[test]
    fn fifo_is_gone_after_relay() {
        let tmp = tempdir().unwrap();
        let bridge = FifoBridge::in_dir(tmp.path());
        let mut out = Vec::new();
        bridge
            .relay(Pipeline::new(Command::new("true")), "tank/home.incr", &mut out)
            .unwrap();
        assert!(!bridge.fifo_path("tank/home.incr").exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn fifo_name_is_sanitized_and_process_scoped() {
        let bridge = FifoBridge::in_dir("/tmp");
        let path = bridge.fifo_path("tank/home.full.17");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("zb-agent.{}.tank_home.full.17", std::process::id()));
    }

    #[test]
    fn copy_chunks_counts_bytes() {
        let bytes = payload(10);
        let mut out = Vec::new();
        let n = copy_chunks(&mut bytes.as_slice(), &mut out).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, bytes);
    }
}
