//! Run reporting: the protocol the walker speaks plus the bundled
//! concretions (console, file, path, JUnit XML).

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::executor::ExecutionResult;
use crate::steps::{write_path_file, Step, StepStatus};

/// Context handed to reporters at run start.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    /// Names of the models in the set, declaration order.
    pub models: Vec<String>,
    /// Generator expressions in effect, one per model (empty for replays).
    pub expressions: Vec<String>,
}

/// What happened to one dispatched step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub status: StepStatus,
    pub execution: ExecutionResult,
}

impl StepResult {
    pub fn passed(execution: ExecutionResult) -> Self {
        Self {
            status: StepStatus::Passed,
            execution,
        }
    }

    pub fn failed(execution: ExecutionResult) -> Self {
        Self {
            status: StepStatus::Failed,
            execution,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            execution: ExecutionResult::default(),
        }
    }
}

/// Context handed to reporters at run end.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub statistics: Value,
    pub passed: bool,
    pub interrupted: bool,
}

/// Lifecycle events a run emits. Every method is total and side-effect only;
/// implementations must not mutate the step or result. Defaults are no-ops
/// so a reporter implements only what it needs.
pub trait Reporter {
    fn start(&mut self, _info: &RunInfo) {}
    fn end(&mut self, _summary: &RunSummary) {}
    fn step_start(&mut self, _step: &Step) {}
    fn step_end(&mut self, _step: &Step, _result: &StepResult) {}
    /// An unexpected error, outside the normal step flow.
    fn error(&mut self, _step: Option<&Step>, _message: &str, _trace: Option<&str>) {}
    /// Implementation-defined report, collected at the end of the run.
    fn report(&mut self) -> Option<Value> {
        None
    }
}

/// Fans every call out to a list of named reporters.
#[derive(Default)]
pub struct Reporting {
    reporters: Vec<(String, Box<dyn Reporter>)>,
}

impl Reporting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reporter under a unique key.
    pub fn register(&mut self, key: &str, reporter: Box<dyn Reporter>) -> Result<()> {
        if self.reporters.iter().any(|(existing, _)| existing == key) {
            anyhow::bail!("a reporter with the key '{key}' is already registered");
        }
        self.reporters.push((key.to_string(), reporter));
        Ok(())
    }

    pub fn unregister(&mut self, key: &str) {
        self.reporters.retain(|(existing, _)| existing != key);
    }

    pub fn start(&mut self, info: &RunInfo) {
        for (_, reporter) in &mut self.reporters {
            reporter.start(info);
        }
    }

    pub fn end(&mut self, summary: &RunSummary) {
        for (_, reporter) in &mut self.reporters {
            reporter.end(summary);
        }
    }

    pub fn step_start(&mut self, step: &Step) {
        for (_, reporter) in &mut self.reporters {
            reporter.step_start(step);
        }
    }

    pub fn step_end(&mut self, step: &Step, result: &StepResult) {
        for (_, reporter) in &mut self.reporters {
            reporter.step_end(step, result);
        }
    }

    pub fn error(&mut self, step: Option<&Step>, message: &str, trace: Option<&str>) {
        for (_, reporter) in &mut self.reporters {
            reporter.error(step, message, trace);
        }
    }

    /// Collected reports of every registered reporter that produced one.
    pub fn report(&mut self) -> Map<String, Value> {
        let mut reports = Map::new();
        for (key, reporter) in &mut self.reporters {
            if let Some(report) = reporter.report() {
                reports.insert(key.clone(), report);
            }
        }
        reports
    }
}

/// Renders run progress as plain text lines.
struct TextRenderer;

impl TextRenderer {
    fn step_start_line(step: &Step) -> String {
        let mut line = format!("{} - running", step.qualified_name());
        if let Some(data) = &step.data {
            if !data.is_empty() {
                let _ = write!(line, "\n  data: {}", json!(data));
            }
        }
        if let Some(unvisited) = &step.unvisited_elements {
            let _ = write!(line, "\n  unvisited: {}", json!(unvisited));
        }
        line
    }

    fn step_end_line(step: &Step, result: &StepResult) -> String {
        let status = match result.status {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        let mut line = format!("{} - {status}", step.qualified_name());
        let execution = &result.execution;
        if !execution.output.is_empty() {
            let _ = write!(line, "\n  output: {}", execution.output.trim_end());
        }
        if let Some(value) = &execution.result {
            let _ = write!(line, "\n  result: {value}");
        }
        if let Some(error) = &execution.error {
            let _ = write!(line, "\n  error: {}", error.message);
            if let Some(trace) = &error.trace {
                let _ = write!(line, "\n{trace}");
            }
        }
        line
    }

    fn end_lines(summary: &RunSummary) -> String {
        let mut text = String::new();
        if let Value::Object(statistics) = &summary.statistics {
            if !statistics.is_empty() {
                let _ = write!(text, "{}", format_statistics(statistics));
            }
        }
        let status = if summary.interrupted {
            "INTERRUPTED"
        } else if summary.passed {
            "PASSED"
        } else {
            "FAILED"
        };
        let _ = write!(text, "Status: {status}");
        text
    }
}

/// Render the generator's statistics object as labeled lines. Known
/// GraphWalker counters get friendly labels; anything else falls back to
/// pretty JSON so nothing is silently dropped.
pub fn format_statistics(statistics: &Map<String, Value>) -> String {
    const LABELS: &[(&str, &str)] = &[
        ("edgeCoverage", "Edge Coverage"),
        ("totalNumberOfEdges", "Number of Edges"),
        ("totalNumberOfVisitedEdges", "Visited Edges"),
        ("totalNumberOfUnvisitedEdges", "Unvisited Edges"),
        ("vertexCoverage", "Vertex Coverage"),
        ("totalNumberOfVertices", "Number of Vertices"),
        ("totalNumberOfVisitedVertices", "Visited Vertices"),
        ("totalNumberOfUnvisitedVertices", "Unvisited Vertices"),
        ("totalNumberOfModels", "Number of Models"),
        ("totalCompletedNumberOfModels", "Completed Models"),
        ("totalFailedNumberOfModels", "Failed Models"),
        ("totalIncompleteNumberOfModels", "Incomplete Models"),
        ("totalNotExecutedNumberOfModels", "Not Executed Models"),
    ];

    let mut text = String::from("Statistics:\n");
    let mut rendered = false;
    for (key, label) in LABELS {
        if let Some(value) = statistics.get(*key) {
            rendered = true;
            let suffix = if key.ends_with("Coverage") { "%" } else { "" };
            let _ = match value {
                Value::String(value) => writeln!(text, "  {label}: {value}{suffix}"),
                other => writeln!(text, "  {label}: {other}{suffix}"),
            };
        }
    }

    if !rendered {
        let pretty = serde_json::to_string_pretty(&Value::Object(statistics.clone()))
            .unwrap_or_else(|_| Value::Object(statistics.clone()).to_string());
        let _ = writeln!(text, "{pretty}");
    }
    text
}

/// Prints run progress to stdout.
#[derive(Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn start(&mut self, info: &RunInfo) {
        if info.models.is_empty() {
            println!("Running:");
        } else {
            println!("Running models: {}", info.models.join(", "));
        }
    }

    fn end(&mut self, summary: &RunSummary) {
        println!("{}", TextRenderer::end_lines(summary));
    }

    fn step_start(&mut self, step: &Step) {
        println!("{}", TextRenderer::step_start_line(step));
    }

    fn step_end(&mut self, step: &Step, result: &StepResult) {
        println!("{}", TextRenderer::step_end_line(step, result));
    }

    fn error(&mut self, step: Option<&Step>, message: &str, trace: Option<&str>) {
        match step {
            Some(step) => println!("Error while running {}: {message}", step.qualified_name()),
            None => println!("Error: {message}"),
        }
        if let Some(trace) = trace {
            println!("{trace}");
        }
    }
}

/// Writes the same text a [`ConsoleReporter`] prints into a file
/// (overwritten at creation, appended per event).
pub struct FileReporter {
    path: PathBuf,
}

impl FileReporter {
    pub fn new(path: &Path) -> Result<Self> {
        File::create(path).with_context(|| format!("create report file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn log(&self, text: &str) {
        let result = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{text}"));
        if let Err(err) = result {
            warn!(path = %self.path.display(), error = %err, "could not write report file");
        }
    }
}

impl Reporter for FileReporter {
    fn start(&mut self, _info: &RunInfo) {
        self.log("Running:");
    }

    fn end(&mut self, summary: &RunSummary) {
        self.log(&TextRenderer::end_lines(summary));
    }

    fn step_start(&mut self, step: &Step) {
        self.log(&TextRenderer::step_start_line(step));
    }

    fn step_end(&mut self, step: &Step, result: &StepResult) {
        self.log(&TextRenderer::step_end_line(step, result));
    }

    fn error(&mut self, step: Option<&Step>, message: &str, trace: Option<&str>) {
        match step {
            Some(step) => self.log(&format!(
                "Error while running {}: {message}",
                step.qualified_name()
            )),
            None => self.log(&format!("Error: {message}")),
        }
        if let Some(trace) = trace {
            self.log(trace);
        }
    }
}

/// Collects every executed non-fixture step and writes the path file at run
/// end. Feeding that file back through the offline planner replays the run.
pub struct PathReporter {
    path: PathBuf,
    steps: Vec<Step>,
}

impl PathReporter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            steps: Vec::new(),
        }
    }
}

impl Reporter for PathReporter {
    fn step_end(&mut self, step: &Step, _result: &StepResult) {
        if !step.is_fixture() {
            self.steps.push(step.clone());
        }
    }

    fn end(&mut self, _summary: &RunSummary) {
        if let Err(err) = write_path_file(&self.path, &self.steps) {
            warn!(path = %self.path.display(), error = %err, "could not write path file");
        }
    }

    fn report(&mut self) -> Option<Value> {
        serde_json::to_value(&self.steps).ok()
    }
}

/// Generates a JUnit-style XML report.
pub struct JUnitXmlReporter {
    path: PathBuf,
    cases: Vec<JUnitCase>,
    current_start: Option<Instant>,
    failures: usize,
    skipped: usize,
}

struct JUnitCase {
    class_name: String,
    name: String,
    seconds: f64,
    status: StepStatus,
    failure: Option<(String, String)>,
}

impl JUnitXmlReporter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            cases: Vec::new(),
            current_start: None,
            failures: 0,
            skipped: 0,
        }
    }

    fn render(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(
            xml,
            "<testsuites tests=\"{}\" failures=\"{}\">",
            self.cases.len(),
            self.failures
        );
        let _ = writeln!(
            xml,
            "  <testsuite name=\"altwalker\" tests=\"{}\" failures=\"{}\" skipped=\"{}\">",
            self.cases.len(),
            self.failures,
            self.skipped
        );
        for case in &self.cases {
            let _ = write!(
                xml,
                "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
                xml_escape(&case.class_name),
                xml_escape(&case.name),
                case.seconds
            );
            match (&case.failure, case.status) {
                (Some((message, trace)), _) => {
                    let _ = writeln!(xml, ">");
                    let _ = writeln!(
                        xml,
                        "      <failure message=\"{}\">{}</failure>",
                        xml_escape(message),
                        xml_escape(trace)
                    );
                    let _ = writeln!(xml, "    </testcase>");
                }
                (None, StepStatus::Skipped) => {
                    let _ = writeln!(xml, ">");
                    let _ = writeln!(xml, "      <skipped/>");
                    let _ = writeln!(xml, "    </testcase>");
                }
                (None, _) => {
                    let _ = writeln!(xml, "/>");
                }
            }
        }
        xml.push_str("  </testsuite>\n</testsuites>\n");
        xml
    }
}

impl Reporter for JUnitXmlReporter {
    fn step_start(&mut self, _step: &Step) {
        self.current_start = Some(Instant::now());
    }

    fn step_end(&mut self, step: &Step, result: &StepResult) {
        if step.is_fixture() {
            return;
        }
        let seconds = self
            .current_start
            .take()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let failure = result.execution.error.as_ref().map(|error| {
            (
                error.message.clone(),
                error.trace.clone().unwrap_or_default(),
            )
        });
        match result.status {
            StepStatus::Failed => self.failures += 1,
            StepStatus::Skipped => self.skipped += 1,
            StepStatus::Passed => {}
        }
        self.cases.push(JUnitCase {
            class_name: step.model_name.clone().unwrap_or_default(),
            name: step.name.clone(),
            seconds,
            status: result.status,
            failure,
        });
    }

    fn end(&mut self, _summary: &RunSummary) {
        if let Err(err) = fs::write(&self.path, self.render()) {
            warn!(path = %self.path.display(), error = %err, "could not write junit report");
        }
    }

    fn report(&mut self) -> Option<Value> {
        Some(Value::String(self.render()))
    }
}

fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Reporter selection for a run.
#[derive(Debug, Clone, Default)]
pub struct ReporterOptions {
    pub report_file: Option<PathBuf>,
    pub report_path_file: Option<PathBuf>,
    pub report_xml_file: Option<PathBuf>,
}

/// Build the reporter set for a run: console always, the rest on demand.
pub fn create_reporters(options: &ReporterOptions) -> Result<Reporting> {
    let mut reporting = Reporting::new();
    reporting.register("console", Box::new(ConsoleReporter))?;

    if let Some(path) = &options.report_file {
        reporting.register("file", Box::new(FileReporter::new(path)?))?;
    }
    if let Some(path) = &options.report_path_file {
        reporting.register("path", Box::new(PathReporter::new(path)))?;
    }
    if let Some(path) = &options.report_xml_file {
        reporting.register("junit", Box::new(JUnitXmlReporter::new(path)))?;
    }
    Ok(reporting)
}
