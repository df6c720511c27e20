//! Scripted fakes for exercising the walker without subprocesses.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::error::{ExecutorError, GeneratorError, ProtocolErrorKind};
use crate::executor::{ExecutionResult, Executor};
use crate::graphwalker::DataValue;
use crate::planner::Planner;
use crate::reporter::{Reporter, RunInfo, RunSummary, StepResult};
use crate::steps::{Step, StepStatus};

/// Planner fed from a fixed list of steps, recording every write-back.
pub struct ScriptedPlanner {
    steps: Vec<Step>,
    position: usize,
    data: BTreeMap<String, String>,
    /// `(key, js-literal)` pairs in call order.
    pub set_data_calls: Vec<(String, String)>,
    pub fail_messages: Vec<String>,
    pub restarts: u32,
    pub closed: u32,
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            position: 0,
            data: BTreeMap::new(),
            set_data_calls: Vec::new(),
            fail_messages: Vec::new(),
            restarts: 0,
            closed: 0,
        }
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

impl Planner for ScriptedPlanner {
    fn has_next(&mut self) -> Result<bool, GeneratorError> {
        Ok(self.position < self.steps.len())
    }

    fn get_next(&mut self) -> Result<Step, GeneratorError> {
        let step = self
            .steps
            .get(self.position)
            .cloned()
            .ok_or_else(|| GeneratorError::MalformedResponse("scripted path exhausted".into()))?;
        self.position += 1;
        Ok(step)
    }

    fn get_data(&mut self) -> Result<BTreeMap<String, String>, GeneratorError> {
        Ok(self.data.clone())
    }

    fn set_data(&mut self, key: &str, value: &DataValue) -> Result<(), GeneratorError> {
        self.set_data_calls
            .push((key.to_string(), value.to_string()));
        let stored = match value {
            DataValue::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.data.insert(key.to_string(), stored);
        Ok(())
    }

    fn restart(&mut self) -> Result<(), GeneratorError> {
        self.restarts += 1;
        self.position = 0;
        Ok(())
    }

    fn fail(&mut self, message: &str) -> Result<(), GeneratorError> {
        self.fail_messages.push(message.to_string());
        Ok(())
    }

    fn get_statistics(&mut self) -> Value {
        json!({"totalNumberOfVisitedEdges": self.position})
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

/// A queued executor response for one (model, step) pair.
pub enum ScriptedResponse {
    Result(ExecutionResult),
    /// A protocol error with the given reserved status code.
    Protocol { status: u16, message: String },
    /// A fatal, transport-class failure.
    Fatal(String),
}

/// Executor answering from scripted presence sets and queued responses.
/// Anything present but without a queued response executes successfully with
/// an empty result.
#[derive(Default)]
pub struct ScriptedExecutor {
    models: HashSet<String>,
    steps: HashSet<(Option<String>, String)>,
    responses: HashMap<(Option<String>, String), VecDeque<ScriptedResponse>>,
    /// `(model, name)` pairs in dispatch order.
    pub executed: Vec<(Option<String>, String)>,
    pub resets: u32,
    pub kills: u32,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: &str) -> Self {
        self.models.insert(name.to_string());
        self
    }

    pub fn with_step(mut self, model: Option<&str>, name: &str) -> Self {
        self.steps.insert(key(model, name));
        self
    }

    /// Queue a response; also marks the step as present.
    pub fn respond(mut self, model: Option<&str>, name: &str, response: ScriptedResponse) -> Self {
        self.steps.insert(key(model, name));
        self.responses
            .entry(key(model, name))
            .or_default()
            .push_back(response);
        self
    }

    pub fn respond_error(self, model: Option<&str>, name: &str, message: &str) -> Self {
        self.respond(
            model,
            name,
            ScriptedResponse::Result(ExecutionResult {
                error: Some(crate::executor::StepError {
                    message: message.to_string(),
                    trace: Some("scripted trace".to_string()),
                }),
                ..ExecutionResult::default()
            }),
        )
    }
}

fn key(model: Option<&str>, name: &str) -> (Option<String>, String) {
    (model.map(str::to_string), name.to_string())
}

impl Executor for ScriptedExecutor {
    fn load(&mut self, _path: &std::path::Path) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ExecutorError> {
        self.resets += 1;
        Ok(())
    }

    fn has_model(&mut self, name: &str) -> Result<bool, ExecutorError> {
        Ok(self.models.contains(name))
    }

    fn has_step(&mut self, model_name: Option<&str>, name: &str) -> Result<bool, ExecutorError> {
        Ok(self.steps.contains(&key(model_name, name)))
    }

    fn execute_step(
        &mut self,
        model_name: Option<&str>,
        name: &str,
        _data: &BTreeMap<String, String>,
        _step: &Step,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.executed.push(key(model_name, name));

        let queued = self
            .responses
            .get_mut(&key(model_name, name))
            .and_then(VecDeque::pop_front);
        match queued {
            None => Ok(ExecutionResult::default()),
            Some(ScriptedResponse::Result(result)) => Ok(result),
            Some(ScriptedResponse::Protocol { status, message }) => Err(ExecutorError::Protocol {
                kind: ProtocolErrorKind::from_status(status),
                status,
                message,
                trace: None,
            }),
            Some(ScriptedResponse::Fatal(message)) => {
                Err(ExecutorError::InvalidResponse(message))
            }
        }
    }

    fn kill(&mut self) {
        self.kills += 1;
    }
}

/// Everything a run tells its reporters, flattened for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ReporterEvent {
    Start,
    End { passed: bool, interrupted: bool },
    StepStart(String),
    StepEnd(String, StepStatus, Option<String>),
    Error(String),
}

/// Reporter that records events behind a shared handle, usable after the
/// `Reporting` aggregate takes ownership.
#[derive(Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<ReporterEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<ReporterEvent>>> {
        Arc::clone(&self.events)
    }

    fn push(&self, event: ReporterEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn start(&mut self, _info: &RunInfo) {
        self.push(ReporterEvent::Start);
    }

    fn end(&mut self, summary: &RunSummary) {
        self.push(ReporterEvent::End {
            passed: summary.passed,
            interrupted: summary.interrupted,
        });
    }

    fn step_start(&mut self, step: &Step) {
        self.push(ReporterEvent::StepStart(step.qualified_name()));
    }

    fn step_end(&mut self, step: &Step, result: &StepResult) {
        self.push(ReporterEvent::StepEnd(
            step.qualified_name(),
            result.status,
            result
                .execution
                .error
                .as_ref()
                .map(|error| error.message.clone()),
        ));
    }

    fn error(&mut self, _step: Option<&Step>, message: &str, _trace: Option<&str>) {
        self.push(ReporterEvent::Error(message.to_string()));
    }
}

/// Drain recorded events into an owned list.
pub fn drain_events(handle: &Arc<Mutex<Vec<ReporterEvent>>>) -> Vec<ReporterEvent> {
    handle
        .lock()
        .map(|events| events.clone())
        .unwrap_or_default()
}
