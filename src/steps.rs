//! Step types shared by the planner, walker, and reporters, plus the
//! path-file format used by `offline` and `walk`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixture names the walker recognizes. Fixtures appear as steps with no id;
/// run-level fixtures also have no model name.
pub const SETUP_RUN: &str = "setUpRun";
pub const TEARDOWN_RUN: &str = "tearDownRun";
pub const SETUP_MODEL: &str = "setUpModel";
pub const TEARDOWN_MODEL: &str = "tearDownModel";
pub const BEFORE_STEP: &str = "beforeStep";
pub const AFTER_STEP: &str = "afterStep";

/// One element of a path, as handed from a planner to the walker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Current graph data, present in verbose mode only. String-typed: the
    /// generator's context is string-valued on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_elements: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_unvisited_elements: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unvisited_elements: Option<Vec<Value>>,
}

impl Step {
    pub fn new(id: &str, model_name: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            model_name: Some(model_name.to_string()),
            ..Self::default()
        }
    }

    /// A fixture pseudo-step. Run-level fixtures have no model name.
    pub fn fixture(name: &str, model_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            model_name: model_name.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn is_fixture(&self) -> bool {
        self.id.is_none()
    }

    /// Display name, `ModelName.step_name` for model steps.
    pub fn qualified_name(&self) -> String {
        match &self.model_name {
            Some(model) => format!("{}.{}", model, self.name),
            None => self.name.clone(),
        }
    }
}

/// Outcome of a dispatched step, as reported to `step_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    /// Not dispatched (its model's setup failed).
    Skipped,
}

/// Read a path file: a JSON array of steps (fixtures omit `modelName`).
pub fn read_path_file(path: &Path) -> Result<Vec<Step>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read steps file {}", path.display()))?;
    let steps: Vec<Step> = serde_json::from_str(&contents)
        .with_context(|| format!("parse steps file {}", path.display()))?;
    Ok(steps)
}

/// Write a path file with a trailing newline.
pub fn write_path_file(path: &Path, steps: &[Step]) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(steps).context("serialize steps")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write steps file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_have_no_id() {
        let fixture = Step::fixture(SETUP_RUN, None);
        assert!(fixture.is_fixture());
        assert_eq!(fixture.qualified_name(), "setUpRun");

        let step = Step::new("v0", "Login", "v_home");
        assert!(!step.is_fixture());
        assert_eq!(step.qualified_name(), "Login.v_home");
    }

    #[test]
    fn path_file_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("steps.json");

        let steps = vec![
            Step::new("v0", "M", "vertex_a"),
            Step::new("e0", "M", "edge_a"),
        ];
        write_path_file(&path, &steps).expect("write");
        let loaded = read_path_file(&path).expect("read");
        assert_eq!(loaded, steps);
    }

    #[test]
    fn path_file_accepts_repeated_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("steps.json");
        fs::write(
            &path,
            r#"[
                {"id": "e0", "modelName": "M", "name": "edge_a"},
                {"id": "e0", "modelName": "M", "name": "edge_a"}
            ]"#,
        )
        .expect("write");

        let loaded = read_path_file(&path).expect("read");
        assert_eq!(loaded.len(), 2);
    }
}
