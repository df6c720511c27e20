//! Supervised GraphWalker REST service subprocess.

use std::env;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::GeneratorError;
use crate::process::{SupervisedProcess, DEFAULT_OUTPUT_CAPACITY};

/// Default GraphWalker executable name.
pub const DEFAULT_EXECUTABLE: &str = "gw";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Model files paired with their generator expressions.
    pub models: Vec<(PathBuf, String)>,
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    pub start_element: Option<String>,
    pub unvisited: bool,
    pub blocked: bool,
    pub executable: String,
    pub startup_timeout: Duration,
    pub output_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            port: 0,
            start_element: None,
            unvisited: false,
            blocked: false,
            executable: DEFAULT_EXECUTABLE.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

/// A running `gw online` REST service.
///
/// The service is always started with `--verbose` so every step carries its
/// `modelName`. On construction success the child is alive and answering;
/// every exit path (drop included) kills it.
#[derive(Debug)]
pub struct GraphWalkerService {
    process: SupervisedProcess,
    port: u16,
}

impl GraphWalkerService {
    pub fn start(options: &ServiceOptions) -> Result<Self, GeneratorError> {
        let port = match options.port {
            0 => find_free_port().map_err(|err| GeneratorError::Spawn(err.to_string()))?,
            port => port,
        };

        let mut cmd = Command::new(&options.executable);
        if let Ok(level) = env::var("GRAPHWALKER_LOG_LEVEL") {
            cmd.args(["--debug", &level]);
        }
        cmd.arg("online")
            .args(["--service", "RESTFUL"])
            .args(["--port", &port.to_string()])
            .arg("--verbose");
        if options.unvisited {
            cmd.arg("--unvisited");
        }
        if options.blocked {
            cmd.args(["--blocked", "true"]);
        }
        if let Some(start_element) = &options.start_element {
            cmd.args(["--start-element", start_element]);
        }
        for (path, expression) in &options.models {
            cmd.arg("--model").arg(path).arg(expression);
        }

        let process = SupervisedProcess::spawn(cmd, options.output_capacity)
            .map_err(|err| GeneratorError::Spawn(err.to_string()))?;
        debug!(port, pid = process.pid(), "GraphWalker service started");

        let mut service = Self { process, port };
        if let Err(err) = service.wait_until_ready(options.startup_timeout) {
            service.kill();
            return Err(err);
        }
        Ok(service)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Last captured stdout/stderr of the child.
    pub fn output_tail(&self) -> String {
        self.process.output_tail()
    }

    /// Exit code if the child has terminated.
    pub fn poll(&mut self) -> Option<Option<i32>> {
        self.process.poll()
    }

    /// Stop the service and free the port. Safe to call more than once.
    pub fn kill(&mut self) {
        self.process.kill();
    }

    /// Poll `/graphwalker/hasNext` until it answers well-formed JSON. The
    /// endpoint responds as soon as the HTTP server is up and models are
    /// loaded, so it doubles as the health check.
    fn wait_until_ready(&mut self, timeout: Duration) -> Result<(), GeneratorError> {
        let url = format!("http://127.0.0.1:{}/graphwalker/hasNext", self.port);
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit_code) = self.process.poll() {
                return Err(GeneratorError::Exited {
                    exit_code,
                    tail: self.process.output_tail(),
                });
            }

            if let Ok(response) = http.get(&url).send() {
                if let Ok(text) = response.text() {
                    if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                        debug!(port = self.port, "GraphWalker service is ready");
                        return Ok(());
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(GeneratorError::StartTimeout {
                    port: self.port,
                    timeout_secs: timeout.as_secs(),
                    tail: self.process.output_tail(),
                });
            }
            thread::sleep(HEALTH_POLL_INTERVAL);
        }
    }
}

/// Ask the OS for an unused port.
pub fn find_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_ports_are_nonzero() {
        let port = find_free_port().expect("port");
        assert_ne!(port, 0);
    }

    #[test]
    fn start_fails_fast_when_the_child_dies() {
        let options = ServiceOptions {
            // `false` exits immediately with a non-zero code and no output.
            executable: "false".to_string(),
            startup_timeout: Duration::from_secs(5),
            ..ServiceOptions::default()
        };
        let err = GraphWalkerService::start(&options).expect_err("should fail");
        assert!(matches!(err, GeneratorError::Exited { .. }));
    }

    #[test]
    fn start_reports_missing_executable() {
        let options = ServiceOptions {
            executable: "definitely-not-a-real-binary".to_string(),
            ..ServiceOptions::default()
        };
        let err = GraphWalkerService::start(&options).expect_err("should fail");
        assert!(matches!(err, GeneratorError::Spawn(_)));
    }
}
