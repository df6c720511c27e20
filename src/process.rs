//! Supervision for long-lived child processes with bounded output capture.
//!
//! Children are spawned with piped stdout/stderr. Background drainer threads
//! copy both streams into a shared ring buffer so the pipes never fill up and
//! an abnormal exit always leaves a diagnosable tail. The drainers only write
//! into the buffer; they never call back into the rest of the runner.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default capacity for captured child output.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 64 * 1024;

/// Bounded byte buffer that evicts the oldest bytes first.
#[derive(Debug)]
pub struct RingBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
    evicted: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(8 * 1024)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push_slice(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
                self.evicted += 1;
            }
            self.buf.push_back(byte);
        }
    }

    /// Total bytes evicted since creation.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    /// The retained tail, lossily decoded.
    pub fn tail(&self) -> String {
        let (front, back) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(self.buf.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// A spawned child plus its output drainers.
///
/// `kill` is idempotent and also runs on drop, so every exit path releases
/// the child.
#[derive(Debug)]
pub struct SupervisedProcess {
    child: Child,
    output: Arc<Mutex<RingBuffer>>,
    drainers: Vec<JoinHandle<()>>,
    killed: bool,
}

impl SupervisedProcess {
    /// Spawn `cmd` with piped stdout/stderr captured into a ring buffer of
    /// `output_capacity` bytes.
    pub fn spawn(mut cmd: Command, output_capacity: usize) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().with_context(|| format!("spawn {:?}", cmd.get_program()))?;
        debug!(pid = child.id(), "spawned child process");

        let output = Arc::new(Mutex::new(RingBuffer::new(output_capacity)));
        let mut drainers = Vec::with_capacity(2);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        drainers.push(spawn_drainer(stdout, Arc::clone(&output)));

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        drainers.push(spawn_drainer(stderr, Arc::clone(&output)));

        Ok(Self {
            child,
            output,
            drainers,
            killed: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit code if the child has terminated, `None` while it is running.
    pub fn poll(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "failed to poll child");
                Some(None)
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.poll().is_none()
    }

    /// The last captured output of the child (stdout and stderr interleaved).
    pub fn output_tail(&self) -> String {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .tail()
    }

    /// Kill the child and reap it. Safe to call more than once.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        if self.child.try_wait().ok().flatten().is_none() {
            if let Err(err) = self.child.kill() {
                debug!(error = %err, "kill failed (child likely already exited)");
            }
            match self.child.wait_timeout(Duration::from_secs(5)) {
                Ok(Some(status)) => debug!(?status, "child reaped"),
                Ok(None) => warn!(pid = self.child.id(), "child did not exit after kill"),
                Err(err) => warn!(error = %err, "wait after kill failed"),
            }
        }

        for handle in self.drainers.drain(..) {
            if handle.join().is_err() {
                warn!("output drainer panicked");
            }
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_drainer<R: Read + Send + 'static>(
    mut reader: R,
    output: Arc<Mutex<RingBuffer>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    output
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push_slice(&chunk[..n]);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_keeps_the_tail() {
        let mut ring = RingBuffer::new(4);
        ring.push_slice(b"abcdef");
        assert_eq!(ring.tail(), "cdef");
        assert_eq!(ring.evicted(), 2);
    }

    #[test]
    fn ring_buffer_under_capacity_keeps_everything() {
        let mut ring = RingBuffer::new(16);
        ring.push_slice(b"hello");
        assert_eq!(ring.tail(), "hello");
        assert_eq!(ring.evicted(), 0);
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2"]);
        let mut process = SupervisedProcess::spawn(cmd, DEFAULT_OUTPUT_CAPACITY).expect("spawn");

        // Wait for exit, then let the drainers finish via kill.
        while process.is_alive() {
            thread::sleep(Duration::from_millis(10));
        }
        process.kill();

        let tail = process.output_tail();
        assert!(tail.contains("out"));
        assert!(tail.contains("err"));
    }

    #[test]
    fn kill_is_idempotent() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut process = SupervisedProcess::spawn(cmd, DEFAULT_OUTPUT_CAPACITY).expect("spawn");

        process.kill();
        process.kill();
        assert!(!process.is_alive());
    }

    #[test]
    fn poll_reports_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 7"]);
        let mut process = SupervisedProcess::spawn(cmd, DEFAULT_OUTPUT_CAPACITY).expect("spawn");

        let code = loop {
            if let Some(code) = process.poll() {
                break code;
            }
            thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(code, Some(7));
    }
}
