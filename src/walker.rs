//! The run state machine tying planner, executor, and reporters together.
//!
//! Control flow is explicit flag-and-continue versus abort: step failures and
//! fixture failures flag the run and keep going; generator failures and
//! executor transport (or load-time protocol) failures abort after a
//! best-effort teardown.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ExecutorError, ProtocolErrorKind};
use crate::executor::{ExecutionResult, Executor, StepError};
use crate::graphwalker::DataValue;
use crate::planner::Planner;
use crate::reporter::{Reporting, RunInfo, RunSummary, StepResult};
use crate::steps::{
    Step, AFTER_STEP, BEFORE_STEP, SETUP_MODEL, SETUP_RUN, TEARDOWN_MODEL, TEARDOWN_RUN,
};

/// Budget for teardown fixtures after an interrupt: a fixture call only
/// starts while the budget lasts.
const TEARDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Cooperative cancellation flag. The walker checks it between steps; the
/// host trips it from wherever interrupts arrive.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final state of a run. `interrupted` is distinct from failure: an
/// interrupted run may not have failed anything it executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub passed: bool,
    pub interrupted: bool,
}

pub struct Walker<'a> {
    planner: &'a mut dyn Planner,
    executor: &'a mut dyn Executor,
    reporting: &'a mut Reporting,
    info: RunInfo,
    cancel: CancelToken,
    failed: bool,
    interrupted: bool,
    /// Model currently set up, torn down at the next model boundary.
    current_model: Option<String>,
    /// Set when the current model's `setUpModel` failed; its steps are
    /// reported as skipped until the next boundary.
    current_model_failed: bool,
    /// Presence cache per (model, fixture) so `hasStep` is asked once.
    fixture_cache: HashMap<(Option<String>, String), bool>,
    teardown_deadline: Option<Instant>,
}

impl<'a> Walker<'a> {
    pub fn new(
        planner: &'a mut dyn Planner,
        executor: &'a mut dyn Executor,
        reporting: &'a mut Reporting,
        info: RunInfo,
    ) -> Self {
        Self {
            planner,
            executor,
            reporting,
            info,
            cancel: CancelToken::new(),
            failed: false,
            interrupted: false,
            current_model: None,
            current_model_failed: false,
            fixture_cache: HashMap::new(),
            teardown_deadline: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the whole path. `Ok` carries the pass/fail/interrupted outcome;
    /// `Err` means the run aborted on a generator or transport failure
    /// (already reported, teardown already attempted).
    pub fn run(&mut self) -> Result<RunOutcome> {
        let info = self.info.clone();
        self.reporting.start(&info);

        if let Err(fatal) = self.try_run() {
            self.failed = true;
            self.reporting.error(None, &format!("{fatal:#}"), None);
            self.abandoned_teardown();
            self.finish_report();
            return Err(fatal);
        }

        self.finish_report();
        Ok(RunOutcome {
            passed: !self.failed,
            interrupted: self.interrupted,
        })
    }

    fn try_run(&mut self) -> Result<()> {
        self.planner.restart()?;
        self.executor.reset()?;

        if !self.execute_fixture(SETUP_RUN, None)? {
            // A failed setUpRun skips every model fixture and step, but the
            // run teardown still happens.
            self.failed = true;
            if !self.execute_fixture(TEARDOWN_RUN, None)? {
                self.failed = true;
            }
            return Ok(());
        }

        loop {
            if self.cancel.is_cancelled() {
                debug!("cancellation requested, stopping before the next step");
                self.interrupted = true;
                self.teardown_deadline = Some(Instant::now() + TEARDOWN_BUDGET);
                break;
            }
            if !self.planner.has_next()? {
                break;
            }
            let step = self.planner.get_next()?;
            self.process_step(step)?;
        }

        self.teardown_open_model()?;
        if self.teardown_allowed(TEARDOWN_RUN) && !self.execute_fixture(TEARDOWN_RUN, None)? {
            self.failed = true;
        }
        Ok(())
    }

    fn process_step(&mut self, step: Step) -> Result<()> {
        let Some(model) = step.model_name.clone() else {
            debug!(name = %step.name, "step without a model name, nothing to dispatch");
            return Ok(());
        };

        if self.current_model.as_deref() != Some(model.as_str()) {
            self.teardown_open_model()?;
            self.current_model = Some(model.clone());
            self.current_model_failed = !self.execute_fixture(SETUP_MODEL, Some(&model))?;
            if self.current_model_failed {
                self.failed = true;
            }
        }

        if self.current_model_failed {
            self.reporting.step_start(&step);
            self.reporting.step_end(&step, &StepResult::skipped());
            return Ok(());
        }

        if step.name.is_empty() {
            // Anonymous vertices and unnamed edges have no method to look up.
            debug!(id = ?step.id, "anonymous element, not dispatched");
            return Ok(());
        }

        let mut before_ok = self.execute_fixture(BEFORE_STEP, None)?;
        if before_ok {
            before_ok = self.execute_fixture(BEFORE_STEP, Some(&model))?;
        }

        if before_ok {
            self.dispatch_step(&step)?;
        } else {
            self.failed = true;
            self.reporting.step_start(&step);
            self.reporting.step_end(&step, &StepResult::skipped());
        }

        // afterStep runs even when beforeStep or the step itself failed.
        let after_model = self.execute_fixture(AFTER_STEP, Some(&model))?;
        let after_global = self.execute_fixture(AFTER_STEP, None)?;
        if !after_model || !after_global {
            self.failed = true;
        }
        Ok(())
    }

    /// Dispatch one regular step. Only generator and transport-class errors
    /// propagate; protocol errors fail the step and the run continues.
    fn dispatch_step(&mut self, step: &Step) -> Result<()> {
        let data_before = self.planner.get_data()?;
        self.reporting.step_start(step);

        let model_name = step.model_name.as_deref();
        match self
            .executor
            .execute_step(model_name, &step.name, &data_before, step)
        {
            Ok(execution) => {
                self.push_data(&data_before, execution.data.as_ref())?;
                match execution.error.clone() {
                    Some(error) => {
                        self.failed = true;
                        self.reporting.step_end(step, &StepResult::failed(execution));
                        self.planner.fail(&error.message)?;
                    }
                    None => {
                        self.reporting.step_end(step, &StepResult::passed(execution));
                    }
                }
            }
            Err(ExecutorError::Protocol {
                kind,
                message,
                trace,
                ..
            }) if !kind.is_fatal() => {
                self.failed = true;
                let mut message = message;
                if kind == ProtocolErrorKind::StepNotFound {
                    message.push_str(
                        "\nUse the 'verify' command to validate the test code against the model(s).",
                    );
                }
                let execution = ExecutionResult {
                    error: Some(StepError {
                        message: message.clone(),
                        trace,
                    }),
                    ..ExecutionResult::default()
                };
                self.reporting.step_end(step, &StepResult::failed(execution));
                self.planner.fail(&message)?;
            }
            Err(fatal) => {
                // Keep the step_start/step_end pairing before aborting.
                self.reporting
                    .step_end(step, &StepResult::failed(ExecutionResult::default()));
                return Err(fatal.into());
            }
        }
        Ok(())
    }

    /// Run a fixture if the test code defines it. Returns false on fixture
    /// failure; absence is success.
    fn execute_fixture(&mut self, name: &str, model: Option<&str>) -> Result<bool> {
        if !self.has_fixture(model, name)? {
            return Ok(true);
        }

        let fixture = Step::fixture(name, model);
        let data_before = self.planner.get_data()?;
        self.reporting.step_start(&fixture);

        match self
            .executor
            .execute_step(model, name, &data_before, &fixture)
        {
            Ok(execution) => {
                self.push_data(&data_before, execution.data.as_ref())?;
                match execution.error.clone() {
                    Some(error) => {
                        self.reporting
                            .step_end(&fixture, &StepResult::failed(execution));
                        self.planner.fail(&error.message)?;
                        Ok(false)
                    }
                    None => {
                        self.reporting
                            .step_end(&fixture, &StepResult::passed(execution));
                        Ok(true)
                    }
                }
            }
            Err(ExecutorError::Protocol {
                kind,
                message,
                trace,
                ..
            }) if !kind.is_fatal() => {
                let execution = ExecutionResult {
                    error: Some(StepError {
                        message: message.clone(),
                        trace,
                    }),
                    ..ExecutionResult::default()
                };
                self.reporting
                    .step_end(&fixture, &StepResult::failed(execution));
                self.planner.fail(&message)?;
                Ok(false)
            }
            Err(fatal) => {
                self.reporting
                    .step_end(&fixture, &StepResult::failed(ExecutionResult::default()));
                Err(fatal.into())
            }
        }
    }

    /// Write modified keys back into the generator. Keys the generator has
    /// never seen are inserted as-is; if it rejects one, that surfaces as a
    /// generator error and aborts the run.
    fn push_data(
        &mut self,
        before: &BTreeMap<String, String>,
        after: Option<&BTreeMap<String, Value>>,
    ) -> Result<()> {
        let Some(after) = after else {
            return Ok(());
        };
        for (key, value) in after {
            let stringified = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            if before.get(key) != Some(&stringified) {
                self.planner.set_data(key, &DataValue::from_json(value))?;
            }
        }
        Ok(())
    }

    fn has_fixture(&mut self, model: Option<&str>, name: &str) -> Result<bool, ExecutorError> {
        let key = (model.map(str::to_string), name.to_string());
        if let Some(&present) = self.fixture_cache.get(&key) {
            return Ok(present);
        }
        let present = self.executor.has_step(model, name)?;
        self.fixture_cache.insert(key, present);
        Ok(present)
    }

    fn teardown_open_model(&mut self) -> Result<()> {
        let Some(model) = self.current_model.take() else {
            return Ok(());
        };
        if self.current_model_failed {
            // The model never finished setting up; there is nothing to tear
            // down.
            self.current_model_failed = false;
            return Ok(());
        }
        if self.teardown_allowed(TEARDOWN_MODEL) && !self.execute_fixture(TEARDOWN_MODEL, Some(&model))? {
            self.failed = true;
        }
        Ok(())
    }

    fn teardown_allowed(&self, name: &str) -> bool {
        match self.teardown_deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!(fixture = name, "teardown budget exhausted, skipping");
                false
            }
            _ => true,
        }
    }

    /// Teardown after a fatal error: the collaborators may be dead, so every
    /// failure here is swallowed.
    fn abandoned_teardown(&mut self) {
        if let Some(model) = self.current_model.take() {
            if !self.current_model_failed {
                if let Err(err) = self.execute_fixture(TEARDOWN_MODEL, Some(&model)) {
                    debug!(error = %err, "tearDownModel failed during abort");
                }
            }
        }
        if let Err(err) = self.execute_fixture(TEARDOWN_RUN, None) {
            debug!(error = %err, "tearDownRun failed during abort");
        }
    }

    fn finish_report(&mut self) {
        let summary = RunSummary {
            statistics: self.planner.get_statistics(),
            passed: !self.failed,
            interrupted: self.interrupted,
        };
        self.reporting.end(&summary);
    }
}
