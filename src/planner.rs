//! Planner layer: abstraction over path sources.
//!
//! The online planner owns the lifecycle of a GraphWalker service subprocess
//! and surfaces live steps and statistics; the offline planner replays a
//! pre-computed path and is inert for everything data-related.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::GeneratorError;
use crate::graphwalker::{
    DataValue, GraphWalkerClient, GraphWalkerService, ServiceOptions, DEFAULT_EXECUTABLE,
};
use crate::model::ModelSet;
use crate::steps::Step;

/// Path source contract consumed by the walker.
///
/// All calls are strictly serial within one run; implementations need no
/// internal synchronization.
pub trait Planner {
    fn has_next(&mut self) -> Result<bool, GeneratorError>;
    fn get_next(&mut self) -> Result<Step, GeneratorError>;
    /// Current graph data. Offline planners return an empty map.
    fn get_data(&mut self) -> Result<BTreeMap<String, String>, GeneratorError>;
    /// Write one key into the graph data. A no-op for offline planners.
    fn set_data(&mut self, key: &str, value: &DataValue) -> Result<(), GeneratorError>;
    /// Reset the path and the statistics.
    fn restart(&mut self) -> Result<(), GeneratorError>;
    /// Mark the current step failed in the generator's statistics. A no-op
    /// for offline planners.
    fn fail(&mut self, message: &str) -> Result<(), GeneratorError>;
    /// Statistics for the current path. Infallible by contract: a planner
    /// that cannot produce them returns an empty object.
    fn get_statistics(&mut self) -> Value;
    /// Release owned resources. Safe to call more than once.
    fn close(&mut self);
}

/// Plans steps live against the GraphWalker REST service, optionally owning
/// the service subprocess.
pub struct OnlinePlanner {
    client: GraphWalkerClient,
    service: Option<GraphWalkerService>,
}

impl OnlinePlanner {
    pub fn new(client: GraphWalkerClient, service: Option<GraphWalkerService>) -> Self {
        Self { client, service }
    }

    pub fn load(&mut self, models: &ModelSet) -> Result<(), GeneratorError> {
        let result = self.client.load(models);
        result.map_err(|err| self.map_failure(err))
    }

    /// Rewrite client failures as [`GeneratorError::Exited`] when the owned
    /// child is gone: the death is the root cause, not the failed request.
    fn map_failure(&mut self, err: GeneratorError) -> GeneratorError {
        if let Some(service) = &mut self.service {
            if let Some(exit_code) = service.poll() {
                return GeneratorError::Exited {
                    exit_code,
                    tail: service.output_tail(),
                };
            }
        }
        err
    }
}

impl Planner for OnlinePlanner {
    fn has_next(&mut self) -> Result<bool, GeneratorError> {
        match self.client.has_next() {
            Ok(has_next) => Ok(has_next),
            // An empty or malformed body from a live child means the path is
            // exhausted; from a dead child it is an error.
            Err(GeneratorError::MalformedResponse(detail)) => match &mut self.service {
                Some(service) => {
                    if service.is_alive() {
                        Ok(false)
                    } else {
                        Err(GeneratorError::Exited {
                            exit_code: service.poll().unwrap_or(None),
                            tail: service.output_tail(),
                        })
                    }
                }
                None => Err(GeneratorError::MalformedResponse(detail)),
            },
            Err(err) => Err(self.map_failure(err)),
        }
    }

    fn get_next(&mut self) -> Result<Step, GeneratorError> {
        self.client.get_next().map_err(|err| self.map_failure(err))
    }

    fn get_data(&mut self) -> Result<BTreeMap<String, String>, GeneratorError> {
        self.client.get_data().map_err(|err| self.map_failure(err))
    }

    fn set_data(&mut self, key: &str, value: &DataValue) -> Result<(), GeneratorError> {
        let result = self.client.set_data(key, value);
        result.map_err(|err| self.map_failure(err))
    }

    fn restart(&mut self) -> Result<(), GeneratorError> {
        self.client.restart().map_err(|err| self.map_failure(err))
    }

    fn fail(&mut self, message: &str) -> Result<(), GeneratorError> {
        let result = self.client.fail(message);
        result.map_err(|err| self.map_failure(err))
    }

    fn get_statistics(&mut self) -> Value {
        match self.client.get_statistics() {
            Ok(statistics) => statistics,
            Err(err) => {
                warn!(error = %err, "could not fetch statistics");
                json!({})
            }
        }
    }

    fn close(&mut self) {
        if let Some(service) = &mut self.service {
            service.kill();
        }
    }
}

impl Drop for OnlinePlanner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Replays a finite, pre-computed path.
pub struct OfflinePlanner {
    path: Vec<Step>,
    position: usize,
}

impl OfflinePlanner {
    pub fn new(path: Vec<Step>) -> Self {
        Self { path, position: 0 }
    }

    /// The steps consumed so far.
    pub fn executed(&self) -> &[Step] {
        &self.path[..self.position]
    }
}

impl Planner for OfflinePlanner {
    fn has_next(&mut self) -> Result<bool, GeneratorError> {
        Ok(self.position < self.path.len())
    }

    fn get_next(&mut self) -> Result<Step, GeneratorError> {
        let step = self
            .path
            .get(self.position)
            .cloned()
            .ok_or_else(|| GeneratorError::MalformedResponse("path exhausted".to_string()))?;
        self.position += 1;
        Ok(step)
    }

    fn get_data(&mut self) -> Result<BTreeMap<String, String>, GeneratorError> {
        Ok(BTreeMap::new())
    }

    fn set_data(&mut self, key: &str, _value: &DataValue) -> Result<(), GeneratorError> {
        debug!(key, "set_data has no effect in offline mode");
        Ok(())
    }

    fn restart(&mut self) -> Result<(), GeneratorError> {
        self.position = 0;
        Ok(())
    }

    fn fail(&mut self, _message: &str) -> Result<(), GeneratorError> {
        Ok(())
    }

    fn get_statistics(&mut self) -> Value {
        json!({
            "steps": self.executed(),
            "failedStep": Value::Null,
            "failedFixtures": [],
        })
    }

    fn close(&mut self) {}
}

/// Options for [`create_planner`].
#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
    /// Model files paired with generator expressions (online modes).
    pub models: Vec<(PathBuf, String)>,
    /// Combined model set, loaded over REST when `host` is set.
    pub model_set: Option<ModelSet>,
    /// Replay these steps instead of generating (takes precedence).
    pub steps: Option<Vec<Step>>,
    /// Connect to an already-running service instead of spawning one.
    pub host: Option<String>,
    pub port: u16,
    pub start_element: Option<String>,
    pub verbose: bool,
    pub unvisited: bool,
    pub blocked: bool,
    pub executable: Option<String>,
}

/// Build a planner: offline when steps are given, client-only online when a
/// host is given, otherwise a spawned GraphWalker service plus client.
pub fn create_planner(options: PlannerOptions) -> Result<Box<dyn Planner>, GeneratorError> {
    if let Some(steps) = options.steps {
        return Ok(Box::new(OfflinePlanner::new(steps)));
    }

    let executable = options
        .executable
        .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string());

    if let Some(host) = options.host {
        let client = GraphWalkerClient::new(&host, options.port, options.verbose)?;
        let mut planner = OnlinePlanner::new(client, None);
        if let Some(models) = &options.model_set {
            planner.load(models)?;
        }
        return Ok(Box::new(planner));
    }

    let service = GraphWalkerService::start(&ServiceOptions {
        models: options.models,
        port: options.port,
        start_element: options.start_element,
        unvisited: options.unvisited,
        blocked: options.blocked,
        executable,
        ..ServiceOptions::default()
    })?;
    let client = GraphWalkerClient::new("127.0.0.1", service.port(), options.verbose)?;
    Ok(Box::new(OnlinePlanner::new(client, Some(service))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> Vec<Step> {
        vec![
            Step::new("v0", "M", "vertex_a"),
            Step::new("e0", "M", "edge_a"),
        ]
    }

    #[test]
    fn offline_planner_replays_in_order() {
        let mut planner = OfflinePlanner::new(path());

        assert!(planner.has_next().expect("has_next"));
        assert_eq!(planner.get_next().expect("get_next").name, "vertex_a");
        assert_eq!(planner.get_next().expect("get_next").name, "edge_a");
        assert!(!planner.has_next().expect("has_next"));
    }

    #[test]
    fn offline_restart_rewinds() {
        let mut planner = OfflinePlanner::new(path());
        planner.get_next().expect("get_next");
        planner.restart().expect("restart");
        assert_eq!(planner.get_next().expect("get_next").name, "vertex_a");
    }

    #[test]
    fn offline_data_calls_are_inert() {
        let mut planner = OfflinePlanner::new(path());
        assert!(planner.get_data().expect("get_data").is_empty());
        planner
            .set_data("key", &DataValue::Integer(1))
            .expect("set_data");
        planner.fail("boom").expect("fail");
        assert!(planner.get_data().expect("get_data").is_empty());
    }

    #[test]
    fn offline_statistics_list_executed_steps() {
        let mut planner = OfflinePlanner::new(path());
        planner.get_next().expect("get_next");

        let statistics = planner.get_statistics();
        let steps = statistics["steps"].as_array().expect("steps");
        assert_eq!(steps.len(), 1);
        assert_eq!(statistics["failedStep"], Value::Null);
        assert_eq!(statistics["failedFixtures"], json!([]));
    }

    #[test]
    fn offline_close_is_idempotent() {
        let mut planner = OfflinePlanner::new(path());
        planner.close();
        planner.close();
        assert!(planner.has_next().expect("has_next"));
    }

    #[test]
    fn create_planner_prefers_steps() {
        let planner = create_planner(PlannerOptions {
            steps: Some(path()),
            ..PlannerOptions::default()
        });
        assert!(planner.is_ok());
    }
}
