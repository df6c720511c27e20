//! Command-level wiring: `check`, `verify`, `online`, `offline`, `walk`.
//!
//! Every entry point guarantees planner and executor teardown on all exit
//! paths; validation happens before anything is spawned, so validation
//! errors never reach a walker.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::RunnerConfig;
use crate::error::{UsageError, ValidationError};
use crate::executor::{create_executor, ExecutorKind};
use crate::graphwalker::{self, OfflineOptions};
use crate::model::{read_model_file, Model, ModelSet};
use crate::planner::{create_planner, PlannerOptions};
use crate::reporter::{create_reporters, ReporterOptions, RunInfo};
use crate::steps::{read_path_file, Step};
use crate::validate::{resolve_generator, validate_model_set, validate_schema};
use crate::verify::{
    format_missing, get_methods, get_missing_methods, suggest_stubs, MissingMethods,
    ModelMethods, SuggestionLanguage,
};
use crate::walker::{CancelToken, RunOutcome, Walker};

/// Result of a test run, with the collected reporter output.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub reports: Map<String, Value>,
}

/// Result of `verify`.
#[derive(Debug)]
pub struct VerifyReport {
    pub missing: Vec<MissingMethods>,
    pub messages: Vec<String>,
    pub stubs: Option<String>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Load one model file into a model set: JSON files are schema-validated and
/// parsed, anything else is delegated to the generator's `convert`.
fn load_model_file(path: &Path, config: &RunnerConfig) -> Result<ModelSet> {
    if is_json(path) {
        let raw = fs::read(path).map_err(|err| ValidationError {
            issues: vec![format!("Cannot read model file: {}: {}.", path.display(), err)],
        })?;
        validate_schema(&raw)?;
        Ok(read_model_file(path)?)
    } else {
        Ok(graphwalker::convert_model(
            path,
            &config.graphwalker.executable,
        )?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Load, validate, and combine model files. With `require_generators`, the
/// generator expression of each model is resolved against the expression its
/// file was given (commands that will generate a path need exactly one
/// source; `verify` does not).
fn load_and_validate(
    models: &[(PathBuf, String)],
    config: &RunnerConfig,
    require_generators: bool,
) -> Result<(ModelSet, Vec<String>)> {
    let mut combined = ModelSet::default();
    let mut expressions = Vec::new();
    let mut issues = Vec::new();

    for (path, expression) in models {
        let mut set = load_model_file(path, config)?;
        let cli_expression = (!expression.is_empty()).then_some(expression.as_str());

        for mut model in set.models.drain(..) {
            model.source_file = Some(path.display().to_string());
            if require_generators {
                match resolve_generator(&model, cli_expression) {
                    Ok(resolved) => expressions.push(resolved),
                    Err(issue) => issues.push(issue),
                }
            }
            combined.models.push(model);
        }
        if combined.name.is_none() {
            combined.name = set.name;
        }
    }

    let semantic = validate_model_set(&combined);
    let mut all_issues = semantic.flatten();
    all_issues.extend(issues);
    if !all_issues.is_empty() {
        return Err(ValidationError { issues: all_issues }.into());
    }

    Ok((combined, expressions))
}

/// Validate models structurally and semantically, then run the generator's
/// own `check` and merge its diagnostics.
pub fn check(models: &[(PathBuf, String)], blocked: bool, config: &RunnerConfig) -> Result<String> {
    load_and_validate(models, config, true)?;

    let output = graphwalker::check(
        models,
        Some(blocked),
        &config.graphwalker.executable,
    )?;
    if !output.starts_with("No issues found with the model(s)") {
        return Err(ValidationError {
            issues: output.lines().map(str::to_string).collect(),
        }
        .into());
    }
    Ok(output)
}

/// Options shared by `verify`.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub tests: PathBuf,
    pub models: Vec<PathBuf>,
    pub executor_kind: ExecutorKind,
    pub executor_url: Option<String>,
    /// Emit ready-to-paste stubs for the misses.
    pub suggestions: bool,
}

/// Check the test code against the models: every model a class, every named
/// element a method.
pub fn verify(options: &VerifyOptions, config: &RunnerConfig) -> Result<VerifyReport> {
    let mut methods: Vec<ModelMethods> = Vec::new();
    for path in &options.models {
        if is_json(path) {
            let pairs: Vec<(PathBuf, String)> = vec![(path.clone(), String::new())];
            let (set, _) = load_and_validate(&pairs, config, false)?;
            methods.extend(get_methods(&set, false));
        } else {
            // The generator owns non-JSON formats; its `methods` subcommand
            // lists the element names, and the model name is the file stem.
            let names = graphwalker::methods(path, false, &config.graphwalker.executable)?;
            let model = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            methods.push(ModelMethods {
                model,
                methods: names,
            });
        }
    }

    let mut executor = create_executor(
        options.executor_kind,
        &options.tests,
        options.executor_url.as_deref().or(config.executor.url.as_deref()),
        &config.launch(),
    )?;
    let missing = {
        let result = get_missing_methods(executor.as_mut(), &methods);
        executor.kill();
        result?
    };

    let stubs = if options.suggestions && !missing.is_empty() {
        let language = match options.executor_kind {
            ExecutorKind::Dotnet => SuggestionLanguage::Dotnet,
            _ => SuggestionLanguage::Python,
        };
        Some(suggest_stubs(&missing, language)?)
    } else {
        None
    };

    Ok(VerifyReport {
        messages: format_missing(&missing),
        missing,
        stubs,
    })
}

/// Options for `online` and `walk`.
#[derive(Debug, Clone)]
pub struct RunTestsOptions {
    pub tests: PathBuf,
    pub executor_kind: ExecutorKind,
    pub executor_url: Option<String>,
    pub gw_host: Option<String>,
    pub gw_port: u16,
    pub start_element: Option<String>,
    pub verbose: bool,
    pub unvisited: bool,
    pub blocked: bool,
    pub reporters: ReporterOptions,
}

impl Default for RunTestsOptions {
    fn default() -> Self {
        Self {
            tests: PathBuf::from("tests"),
            executor_kind: ExecutorKind::Http,
            executor_url: None,
            gw_host: None,
            gw_port: 0,
            start_element: None,
            verbose: false,
            unvisited: false,
            blocked: false,
            reporters: ReporterOptions::default(),
        }
    }
}

/// Generate and run a path online.
pub fn online(
    models: &[(PathBuf, String)],
    options: &RunTestsOptions,
    config: &RunnerConfig,
    cancel: CancelToken,
) -> Result<RunReport> {
    let (model_set, expressions) = load_and_validate(models, config, true)?;

    let info = RunInfo {
        models: model_names(&model_set.models),
        expressions,
    };
    let gw_host = options.gw_host.clone().or(config.graphwalker.host.clone());
    let gw_port = match options.gw_port {
        0 => config.graphwalker.port,
        port => port,
    };
    let planner_options = PlannerOptions {
        models: models.to_vec(),
        model_set: gw_host.is_some().then_some(model_set),
        steps: None,
        host: gw_host,
        port: gw_port,
        start_element: options.start_element.clone(),
        verbose: options.verbose,
        unvisited: options.unvisited,
        blocked: options.blocked,
        executable: Some(config.graphwalker.executable.clone()),
    };

    run_tests(planner_options, info, options, config, cancel)
}

/// Replay a recorded path through the offline planner.
pub fn walk(
    steps_file: &Path,
    options: &RunTestsOptions,
    config: &RunnerConfig,
    cancel: CancelToken,
) -> Result<RunReport> {
    let steps = read_path_file(steps_file)?;
    let info = RunInfo {
        models: step_model_names(&steps),
        expressions: Vec::new(),
    };
    let planner_options = PlannerOptions {
        steps: Some(steps),
        ..PlannerOptions::default()
    };

    run_tests(planner_options, info, options, config, cancel)
}

fn run_tests(
    planner_options: PlannerOptions,
    info: RunInfo,
    options: &RunTestsOptions,
    config: &RunnerConfig,
    cancel: CancelToken,
) -> Result<RunReport> {
    let mut reporting = create_reporters(&options.reporters)?;

    let mut planner = create_planner(planner_options)?;
    let mut executor = match create_executor(
        options.executor_kind,
        &options.tests,
        options.executor_url.as_deref().or(config.executor.url.as_deref()),
        &config.launch(),
    ) {
        Ok(executor) => executor,
        Err(err) => {
            planner.close();
            return Err(err.into());
        }
    };

    let mut walker = Walker::new(planner.as_mut(), executor.as_mut(), &mut reporting, info)
        .with_cancel_token(cancel);
    let result = walker.run();

    planner.close();
    executor.kill();

    let outcome = result?;
    debug!(?outcome, "run finished");
    Ok(RunReport {
        outcome,
        reports: reporting.report(),
    })
}

/// Options for the `offline` command.
#[derive(Debug, Clone, Default)]
pub struct OfflineCommandOptions {
    pub start_element: Option<String>,
    pub verbose: bool,
    pub unvisited: bool,
    pub blocked: bool,
    pub output_file: Option<PathBuf>,
}

/// Generate a path without executing it. `never` and `time_duration` stop
/// conditions cannot terminate, so they are rejected up front.
pub fn offline(
    models: &[(PathBuf, String)],
    options: &OfflineCommandOptions,
    config: &RunnerConfig,
) -> Result<Vec<Step>> {
    validate_stop_conditions(models)?;
    load_and_validate(models, config, true)?;

    let steps = graphwalker::offline(
        models,
        &OfflineOptions {
            start_element: options.start_element.clone(),
            verbose: options.verbose,
            unvisited: options.unvisited,
            blocked: options.blocked,
            executable: config.graphwalker.executable.clone(),
        },
    )?;

    if let Some(path) = &options.output_file {
        crate::steps::write_path_file(path, &steps)?;
    }
    Ok(steps)
}

fn validate_stop_conditions(models: &[(PathBuf, String)]) -> Result<(), UsageError> {
    for (_, stop_condition) in models {
        let normalized = normalize_stop_condition(stop_condition);
        if normalized.contains("never") || normalized.contains("timeduration") {
            return Err(UsageError(format!(
                "Invalid stop condition: '{stop_condition}'. \
                 The 'never' and 'time_duration' stop conditions are not allowed in offline mode."
            )));
        }
    }
    Ok(())
}

/// Lowercase, drop underscores, and blank out `reached_vertex(...)` /
/// `reached_edge(...)` arguments so element names cannot fake a forbidden
/// stop condition (e.g. `reached_vertex(v_never)`).
fn normalize_stop_condition(stop_condition: &str) -> String {
    let lowered: String = stop_condition
        .to_lowercase()
        .chars()
        .filter(|ch| *ch != '_')
        .collect();

    let mut normalized = String::with_capacity(lowered.len());
    let mut rest = lowered.as_str();
    loop {
        let next = ["reachedvertex(", "reachededge("]
            .iter()
            .filter_map(|marker| rest.find(marker).map(|at| (at, marker.len())))
            .min();
        match next {
            Some((at, marker_len)) => {
                let after_marker = at + marker_len;
                normalized.push_str(&rest[..after_marker]);
                rest = match rest[after_marker..].find(')') {
                    Some(close) => &rest[after_marker + close..],
                    None => "",
                };
            }
            None => {
                normalized.push_str(rest);
                break;
            }
        }
    }
    normalized
}

fn model_names(models: &[Model]) -> Vec<String> {
    models.iter().map(|model| model.name.clone()).collect()
}

fn step_model_names(steps: &[Step]) -> Vec<String> {
    let mut names = Vec::new();
    for step in steps {
        if let Some(model) = &step.model_name {
            if !names.contains(model) {
                names.push(model.clone());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_condition_normalization_ignores_element_names() {
        assert_eq!(
            normalize_stop_condition("reached_vertex(v_never)"),
            "reachedvertex()"
        );
        assert_eq!(
            normalize_stop_condition("random(reached_edge(e_time_duration))"),
            "random(reachededge())"
        );
        assert!(normalize_stop_condition("random(never)").contains("never"));
        assert!(normalize_stop_condition("random(time_duration(10))").contains("timeduration"));
    }

    #[test]
    fn offline_rejects_never_and_time_duration() {
        let models = vec![(PathBuf::from("m.json"), "random(never)".to_string())];
        let err = validate_stop_conditions(&models).expect_err("should fail");
        assert!(err.0.contains("not allowed in offline mode"));

        let models = vec![(
            PathBuf::from("m.json"),
            "random(time_duration(10))".to_string(),
        )];
        assert!(validate_stop_conditions(&models).is_err());

        let models = vec![(
            PathBuf::from("m.json"),
            "random(reached_vertex(v_never))".to_string(),
        )];
        assert!(validate_stop_conditions(&models).is_ok());
    }

    #[test]
    fn walk_model_names_follow_first_appearance() {
        let steps = vec![
            Step::new("v0", "B", "vertex_b"),
            Step::new("v1", "A", "vertex_a"),
            Step::new("v2", "B", "vertex_b2"),
        ];
        assert_eq!(step_model_names(&steps), vec!["B", "A"]);
    }

    #[test]
    fn load_and_validate_reports_issues() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        fs::write(
            &path,
            r#"{"models": [{"name": "M", "vertices": [{"id": "v0", "name": "return"}], "edges": []}]}"#,
        )
        .expect("write");

        let models = vec![(path, "random(never)".to_string())];
        let err = load_and_validate(&models, &RunnerConfig::default(), true).expect_err("should fail");
        let validation = err.downcast_ref::<ValidationError>().expect("validation error");
        assert!(validation.issues[0].contains("reserve keyword"));
    }

    #[test]
    fn load_and_validate_flags_double_generators() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gen.json");
        fs::write(
            &path,
            r#"{"models": [{"name": "M", "generator": "random(never)", "vertices": [{"id": "v0", "name": "a"}], "edges": []}]}"#,
        )
        .expect("write");

        let models = vec![(path.clone(), "random(length(5))".to_string())];
        let err = load_and_validate(&models, &RunnerConfig::default(), true).expect_err("should fail");
        assert!(err.to_string().contains("also given on the command line"));

        // With no command-line expression the model's own generator resolves.
        let models = vec![(path, String::new())];
        let (_, expressions) =
            load_and_validate(&models, &RunnerConfig::default(), true).expect("load");
        assert_eq!(expressions, vec!["random(never)".to_string()]);
    }
}
