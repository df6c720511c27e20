//! Supervised executor service subprocess.
//!
//! Used when the runner co-spawns the language executor (a compiled test
//! executable, a `dotnet run` project, a python server). The child is
//! supervised exactly like the generator: captured output, health wait,
//! kill on close.

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ExecutorError;
use crate::process::{SupervisedProcess, DEFAULT_OUTPUT_CAPACITY};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ExecutorServiceOptions {
    /// Fully rendered launch command (program followed by its arguments).
    pub command: Vec<String>,
    /// Base URL the service will listen on, polled for readiness.
    pub url: String,
    pub startup_timeout: Duration,
    pub output_capacity: usize,
}

impl Default for ExecutorServiceOptions {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            url: crate::executor::DEFAULT_URL.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct ExecutorService {
    process: SupervisedProcess,
    url: String,
}

impl ExecutorService {
    pub fn start(options: &ExecutorServiceOptions) -> Result<Self, ExecutorError> {
        let (program, args) = options
            .command
            .split_first()
            .ok_or_else(|| ExecutorError::ServiceStart("empty launch command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);

        let process = SupervisedProcess::spawn(cmd, options.output_capacity)
            .map_err(|err| ExecutorError::ServiceStart(err.to_string()))?;
        debug!(url = %options.url, pid = process.pid(), "executor service started");

        let mut service = Self {
            process,
            url: options.url.clone(),
        };
        if let Err(err) = service.wait_until_ready(options.startup_timeout) {
            service.kill();
            return Err(err);
        }
        Ok(service)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    pub fn output_tail(&self) -> String {
        self.process.output_tail()
    }

    /// Kill the service. Safe to call more than once.
    pub fn kill(&mut self) {
        self.process.kill();
    }

    /// Poll the base URL until the server answers at all; any HTTP status
    /// counts as alive.
    fn wait_until_ready(&mut self, timeout: Duration) -> Result<(), ExecutorError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit_code) = self.process.poll() {
                return Err(ExecutorError::ServiceStart(format!(
                    "executor service exited with code {exit_code:?}\n{}",
                    self.process.output_tail()
                )));
            }

            if http.get(&self.url).send().is_ok() {
                debug!(url = %self.url, "executor service is ready");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(ExecutorError::ServiceStart(format!(
                    "executor service did not answer on {} within {}s\n{}",
                    self.url,
                    timeout.as_secs(),
                    self.process.output_tail()
                )));
            }
            thread::sleep(HEALTH_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_rejects_empty_commands() {
        let err = ExecutorService::start(&ExecutorServiceOptions::default()).expect_err("fail");
        assert!(matches!(err, ExecutorError::ServiceStart(_)));
    }

    #[test]
    fn start_fails_fast_when_the_child_dies() {
        let options = ExecutorServiceOptions {
            command: vec!["false".to_string()],
            startup_timeout: Duration::from_secs(5),
            ..ExecutorServiceOptions::default()
        };
        let err = ExecutorService::start(&options).expect_err("should fail");
        match err {
            ExecutorError::ServiceStart(message) => assert!(message.contains("exited")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
