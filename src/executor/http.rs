//! HTTP client for the executor wire protocol (`/altwalker/*`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Response;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ExecutorError, ProtocolErrorKind};
use crate::executor::process::ExecutorService;
use crate::executor::{execute_step_body, ExecutionResult, Executor};
use crate::steps::Step;

/// Timeout for presence checks and resets. `executeStep` runs without one:
/// test steps may legitimately take minutes.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpExecutor {
    base: String,
    http: reqwest::blocking::Client,
    service: Option<ExecutorService>,
}

impl HttpExecutor {
    pub fn new(url: &str) -> Result<Self, ExecutorError> {
        let http = reqwest::blocking::Client::builder().build()?;
        let base = format!("{}/altwalker", url.trim_end_matches('/'));
        debug!(%base, "initializing executor client");
        Ok(Self {
            base,
            http,
            service: None,
        })
    }

    /// Client plus ownership of the service subprocess it talks to.
    pub fn with_service(url: &str, service: ExecutorService) -> Result<Self, ExecutorError> {
        let mut executor = Self::new(url)?;
        executor.service = Some(service);
        Ok(executor)
    }

    fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Map<String, Value>, ExecutorError> {
        let response = self
            .http
            .get(format!("{}/{path}", self.base))
            .query(params)
            .timeout(CONTROL_TIMEOUT)
            .send()?;
        payload(response)
    }

    fn put(&self, path: &str) -> Result<Map<String, Value>, ExecutorError> {
        let response = self
            .http
            .put(format!("{}/{path}", self.base))
            .timeout(CONTROL_TIMEOUT)
            .send()?;
        payload(response)
    }

    fn post(
        &self,
        path: &str,
        params: &[(&str, &str)],
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<Map<String, Value>, ExecutorError> {
        let mut request = self
            .http
            .post(format!("{}/{path}", self.base))
            .query(params)
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        payload(request.send()?)
    }
}

impl Executor for HttpExecutor {
    /// POST `/load` with the tests path.
    fn load(&mut self, path: &Path) -> Result<(), ExecutorError> {
        debug!(path = %path.display(), "loading test code");
        let body = serde_json::json!({"path": path.display().to_string()});
        self.post("load", &[], &body, Some(CONTROL_TIMEOUT))?;
        Ok(())
    }

    /// PUT `/reset`.
    fn reset(&mut self) -> Result<(), ExecutorError> {
        self.put("reset")?;
        Ok(())
    }

    /// GET `/hasModel?name=...`.
    fn has_model(&mut self, name: &str) -> Result<bool, ExecutorError> {
        let payload = self.get("hasModel", &[("name", name)])?;
        match payload.get("hasModel") {
            Some(Value::Bool(has_model)) => Ok(*has_model),
            _ => Err(ExecutorError::InvalidResponse(
                "the payload must include the key: hasModel".to_string(),
            )),
        }
    }

    /// GET `/hasStep?name=...[&modelName=...]`.
    fn has_step(&mut self, model_name: Option<&str>, name: &str) -> Result<bool, ExecutorError> {
        let mut params = vec![("name", name)];
        if let Some(model_name) = model_name {
            params.push(("modelName", model_name));
        }
        let payload = self.get("hasStep", &params)?;
        match payload.get("hasStep") {
            Some(Value::Bool(has_step)) => Ok(*has_step),
            _ => Err(ExecutorError::InvalidResponse(
                "the payload must include the key: hasStep".to_string(),
            )),
        }
    }

    /// POST `/executeStep?name=...[&modelName=...]` with the current data.
    fn execute_step(
        &mut self,
        model_name: Option<&str>,
        name: &str,
        data: &BTreeMap<String, String>,
        step: &Step,
    ) -> Result<ExecutionResult, ExecutorError> {
        let mut params = vec![("name", name)];
        if let Some(model_name) = model_name {
            params.push(("modelName", model_name));
        }
        let body = execute_step_body(data, step);
        let payload = self.post("executeStep", &params, &body, None)?;

        if !payload.contains_key("output") {
            return Err(ExecutorError::InvalidResponse(
                "the payload must include the key: output".to_string(),
            ));
        }
        serde_json::from_value(Value::Object(payload))
            .map_err(|err| ExecutorError::InvalidResponse(err.to_string()))
    }

    fn kill(&mut self) {
        if let Some(service) = &mut self.service {
            service.kill();
        }
    }
}

impl Drop for HttpExecutor {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Check the status code and unwrap the `payload` envelope. Non-200 answers
/// are mapped onto the reserved protocol error kinds with the error
/// envelope's message and trace attached when present.
fn payload(response: Response) -> Result<Map<String, Value>, ExecutorError> {
    let status = response.status().as_u16();
    let body: Value = response.json().unwrap_or(Value::Null);

    if status != 200 {
        let kind = ProtocolErrorKind::from_status(status);
        let (message, trace) = match body.get("error") {
            Some(error) => (
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(kind.describe())
                    .to_string(),
                error
                    .get("trace")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            None => (kind.describe().to_string(), None),
        };
        return Err(ExecutorError::Protocol {
            kind,
            status,
            message,
            trace,
        });
    }

    match body.get("payload") {
        Some(Value::Object(payload)) => Ok(payload.clone()),
        _ => Ok(Map::new()),
    }
}
