//! Executor layer: a uniform contract for dispatching steps to test code.

mod http;
mod process;

pub use http::HttpExecutor;
pub use process::{ExecutorService, ExecutorServiceOptions};

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExecutorError;
use crate::steps::Step;

/// Default executor service URL.
pub const DEFAULT_URL: &str = "http://localhost:5000";

/// Error reported by the test code for one step. Presence marks the step
/// failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Outcome of one dispatched step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Captured stdout of the step method.
    #[serde(default)]
    pub output: String,
    /// Return value of the step method, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Post-step context overrides, keyed by graph-data key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl ExecutionResult {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Test execution contract. A `model_name` of `None` addresses run-level
/// fixtures (functions outside any model class).
pub trait Executor {
    fn load(&mut self, path: &Path) -> Result<(), ExecutorError>;
    fn reset(&mut self) -> Result<(), ExecutorError>;
    fn has_model(&mut self, name: &str) -> Result<bool, ExecutorError>;
    fn has_step(&mut self, model_name: Option<&str>, name: &str) -> Result<bool, ExecutorError>;
    fn execute_step(
        &mut self,
        model_name: Option<&str>,
        name: &str,
        data: &BTreeMap<String, String>,
        step: &Step,
    ) -> Result<ExecutionResult, ExecutorError>;
    /// Tear down the owned subprocess if any. Safe to call more than once.
    fn kill(&mut self);
}

/// Executor that accepts every step and does nothing. Used when a path is
/// walked without dispatching to test code (e.g. dry runs of a recorded
/// path).
#[derive(Debug, Default)]
pub struct NoopExecutor;

impl Executor for NoopExecutor {
    fn load(&mut self, _path: &Path) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn has_model(&mut self, _name: &str) -> Result<bool, ExecutorError> {
        Ok(true)
    }

    fn has_step(&mut self, _model_name: Option<&str>, _name: &str) -> Result<bool, ExecutorError> {
        Ok(false)
    }

    fn execute_step(
        &mut self,
        _model_name: Option<&str>,
        _name: &str,
        _data: &BTreeMap<String, String>,
        _step: &Step,
    ) -> Result<ExecutionResult, ExecutorError> {
        Ok(ExecutionResult::default())
    }

    fn kill(&mut self) {}
}

/// Supported executor types. The core is language-agnostic HTTP; the
/// language variants only differ in how the service subprocess is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Http,
    Python,
    Dotnet,
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "python" | "py" => Ok(Self::Python),
            "dotnet" | "csharp" | "c#" => Ok(Self::Dotnet),
            other => Err(format!(
                "Executor type '{other}' is not supported. Supported executor types are: http, python, dotnet."
            )),
        }
    }
}

/// How to launch each language's executor service. Commands are templates:
/// `{tests}` and `{url}` are substituted before spawning.
#[derive(Debug, Clone)]
pub struct ExecutorLaunch {
    pub python_command: Vec<String>,
    pub dotnet_command: Vec<String>,
}

impl Default for ExecutorLaunch {
    fn default() -> Self {
        Self {
            python_command: vec![
                "altwalker-executor-python".to_string(),
                "{tests}".to_string(),
                "--url".to_string(),
                "{url}".to_string(),
            ],
            dotnet_command: vec![
                "dotnet".to_string(),
                "run".to_string(),
                "--project".to_string(),
                "{tests}".to_string(),
                "--server.urls={url}".to_string(),
            ],
        }
    }
}

fn render_command(template: &[String], tests: &Path, url: &str) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            part.replace("{tests}", &tests.display().to_string())
                .replace("{url}", url)
        })
        .collect()
}

/// Create and initialize an executor.
///
/// `http` connects to an already-running service and loads the test path
/// over the wire; the language kinds spawn their service subprocess with the
/// tests path baked into the launch command, supervise it, and skip the wire
/// load.
pub fn create_executor(
    kind: ExecutorKind,
    tests: &Path,
    url: Option<&str>,
    launch: &ExecutorLaunch,
) -> Result<Box<dyn Executor>, ExecutorError> {
    let url = url.unwrap_or(DEFAULT_URL);

    match kind {
        ExecutorKind::Http => {
            let mut executor = HttpExecutor::new(url)?;
            executor.load(tests)?;
            Ok(Box::new(executor))
        }
        ExecutorKind::Python => {
            let command = render_command(&launch.python_command, tests, url);
            spawn_service_executor(command, url)
        }
        ExecutorKind::Dotnet => {
            let command = render_command(&launch.dotnet_command, tests, url);
            spawn_service_executor(command, url)
        }
    }
}

fn spawn_service_executor(
    command: Vec<String>,
    url: &str,
) -> Result<Box<dyn Executor>, ExecutorError> {
    let service = ExecutorService::start(&ExecutorServiceOptions {
        command,
        url: url.to_string(),
        ..ExecutorServiceOptions::default()
    })?;
    let executor = HttpExecutor::with_service(url, service)?;
    Ok(Box::new(executor))
}

/// Build the wire payload for `executeStep`.
pub(crate) fn execute_step_body(data: &BTreeMap<String, String>, step: &Step) -> Value {
    let mut body = Map::new();
    body.insert(
        "data".to_string(),
        Value::Object(
            data.iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect(),
        ),
    );
    body.insert(
        "step".to_string(),
        serde_json::to_value(step).unwrap_or(Value::Null),
    );
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_executor_accepts_everything_silently() {
        let mut executor = NoopExecutor;
        assert!(executor.has_model("Anything").expect("has_model"));
        assert!(!executor.has_step(None, "setUpRun").expect("has_step"));
        let result = executor
            .execute_step(Some("M"), "v", &BTreeMap::new(), &Step::new("v0", "M", "v"))
            .expect("execute");
        assert!(!result.failed());
        executor.kill();
        executor.kill();
    }

    #[test]
    fn executor_kind_parses_aliases() {
        assert_eq!("http".parse::<ExecutorKind>(), Ok(ExecutorKind::Http));
        assert_eq!("py".parse::<ExecutorKind>(), Ok(ExecutorKind::Python));
        assert_eq!("C#".parse::<ExecutorKind>(), Ok(ExecutorKind::Dotnet));
        assert!("ruby".parse::<ExecutorKind>().is_err());
    }

    #[test]
    fn launch_templates_substitute_placeholders() {
        let launch = ExecutorLaunch::default();
        let command = render_command(
            &launch.dotnet_command,
            Path::new("tests/app"),
            "http://localhost:5000",
        );
        assert!(command.contains(&"tests/app".to_string()));
        assert!(command.contains(&"--server.urls=http://localhost:5000".to_string()));
    }

    #[test]
    fn execution_result_failure_follows_error_presence() {
        let passed: ExecutionResult = serde_json::from_str(r#"{"output": ""}"#).expect("parse");
        assert!(!passed.failed());

        let failed: ExecutionResult =
            serde_json::from_str(r#"{"output": "x", "error": {"message": "boom", "trace": "t"}}"#)
                .expect("parse");
        assert!(failed.failed());
        assert_eq!(failed.error.expect("error").message, "boom");
    }

    #[test]
    fn execute_step_body_carries_data_and_step() {
        let mut data = BTreeMap::new();
        data.insert("count".to_string(), "0".to_string());
        let step = Step::new("v0", "M", "vertex_a");

        let body = execute_step_body(&data, &step);
        assert_eq!(body["data"]["count"], "0");
        assert_eq!(body["step"]["name"], "vertex_a");
    }
}
