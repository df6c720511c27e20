//! One-shot GraphWalker subcommands: `offline`, `check`, `methods`,
//! `convert`.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::debug;

use crate::error::GeneratorError;
use crate::graphwalker::normalize_step;
use crate::graphwalker::service::DEFAULT_EXECUTABLE;
use crate::model::ModelSet;
use crate::steps::Step;

#[derive(Debug, Clone)]
pub struct OfflineOptions {
    pub start_element: Option<String>,
    /// Keep `data` and `properties` on the returned steps.
    pub verbose: bool,
    pub unvisited: bool,
    pub blocked: bool,
    pub executable: String,
}

impl Default for OfflineOptions {
    fn default() -> Self {
        Self {
            start_element: None,
            verbose: false,
            unvisited: false,
            blocked: false,
            executable: DEFAULT_EXECUTABLE.to_string(),
        }
    }
}

/// Run the `check` subcommand over model/expression pairs and return its
/// diagnostics text.
pub fn check(
    models: &[(PathBuf, String)],
    blocked: Option<bool>,
    executable: &str,
) -> Result<String, GeneratorError> {
    let mut args = vec!["check".to_string()];
    push_models(&mut args, models);
    if let Some(blocked) = blocked {
        args.push("--blocked".to_string());
        args.push(blocked.to_string());
    }
    run_gw(executable, &args)
}

/// Run the `methods` subcommand: unique vertex/edge names of one model file.
pub fn methods(
    model_path: &Path,
    blocked: bool,
    executable: &str,
) -> Result<Vec<String>, GeneratorError> {
    let mut args = vec![
        "methods".to_string(),
        "--model".to_string(),
        model_path.display().to_string(),
    ];
    if blocked {
        args.push("--blocked".to_string());
        args.push("true".to_string());
    }

    let output = run_gw(executable, &args)?;
    Ok(output
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Generate a full path with the `offline` subcommand.
///
/// The command always runs with `--verbose` on the wire (the only way to get
/// `modelName` per step); the caller's `verbose` flag controls whether data
/// and properties are kept on the normalized steps.
pub fn offline(
    models: &[(PathBuf, String)],
    options: &OfflineOptions,
) -> Result<Vec<Step>, GeneratorError> {
    let mut args = vec!["offline".to_string()];
    push_models(&mut args, models);
    if let Some(start_element) = &options.start_element {
        args.push("--start-element".to_string());
        args.push(start_element.clone());
    }
    args.push("--verbose".to_string());
    if options.unvisited {
        args.push("--unvisited".to_string());
    }
    if options.blocked {
        args.push("--blocked".to_string());
        args.push("true".to_string());
    }

    let output = run_gw(&options.executable, &args)?;
    parse_offline_output(&output, options.verbose)
}

/// Convert a model file (e.g. GraphML) into the JSON model format via the
/// `convert` subcommand.
pub fn convert_model(model_path: &Path, executable: &str) -> Result<ModelSet, GeneratorError> {
    let args = vec![
        "convert".to_string(),
        "--model".to_string(),
        model_path.display().to_string(),
        "--format".to_string(),
        "json".to_string(),
    ];
    let output = run_gw(executable, &args)?;
    serde_json::from_str(&output).map_err(|err| {
        GeneratorError::MalformedResponse(format!("convert output is not a model set: {err}"))
    })
}

/// One step per line of JSON.
fn parse_offline_output(output: &str, verbose: bool) -> Result<Vec<Step>, GeneratorError> {
    let mut steps = Vec::new();
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let body: Value = serde_json::from_str(line).map_err(|err| {
            GeneratorError::MalformedResponse(format!("offline step is not json: {err}"))
        })?;
        match body {
            Value::Object(body) => steps.push(normalize_step(body, verbose)),
            _ => {
                return Err(GeneratorError::MalformedResponse(
                    "offline step is not an object".to_string(),
                ))
            }
        }
    }
    Ok(steps)
}

fn push_models(args: &mut Vec<String>, models: &[(PathBuf, String)]) {
    for (path, expression) in models {
        args.push("--model".to_string());
        args.push(path.display().to_string());
        args.push(expression.clone());
    }
}

fn run_gw(executable: &str, args: &[String]) -> Result<String, GeneratorError> {
    debug!(executable, ?args, "running GraphWalker command");
    let output = Command::new(executable)
        .args(args)
        .output()
        .map_err(|err| GeneratorError::Spawn(format!("{executable}: {err}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return Err(GeneratorError::Command(stderr.trim().to_string()));
    }
    if !output.status.success() {
        return Err(GeneratorError::Command(format!(
            "{executable} exited with code {:?}",
            output.status.code()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_output_parses_line_per_step() {
        let output = concat!(
            "{\"currentElementID\":\"v0\",\"currentElementName\":\"vertex_a\",\"modelName\":\"M\"}\n",
            "{\"currentElementID\":\"e0\",\"currentElementName\":\"edge_a\",\"modelName\":\"M\"}\n",
        );
        let steps = parse_offline_output(output, false).expect("parse");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "vertex_a");
        assert_eq!(steps[1].id.as_deref(), Some("e0"));
    }

    #[test]
    fn offline_output_rejects_garbage() {
        let err = parse_offline_output("not json\n", false).expect_err("should fail");
        assert!(matches!(err, GeneratorError::MalformedResponse(_)));
    }

    #[test]
    fn command_failure_carries_stderr() {
        let err = run_gw("sh", &["-c".to_string(), "echo broken 1>&2".to_string()])
            .expect_err("should fail");
        match err {
            GeneratorError::Command(message) => assert_eq!(message, "broken"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn command_success_returns_stdout() {
        let output = run_gw("sh", &["-c".to_string(), "echo ok".to_string()]).expect("run");
        assert_eq!(output.trim(), "ok");
    }
}
