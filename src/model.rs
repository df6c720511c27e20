//! Model-set data types and model-file loading.
//!
//! The types stay permissive on purpose: unknown per-element keys are kept in
//! `extra` and round-trip to the generator untouched (the generator owns the
//! interpretation of the graph). Structural and semantic checking lives in
//! [`crate::validate`].

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Name used when no model file provides one.
pub const UNNAMED_MODEL_SUITE: &str = "Unnamed Model Suite";

/// A named collection of models, the unit the generator loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub models: Vec<Model>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_element_id: Option<String>,
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// Path of the file this model was loaded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Unknown keys, preserved for the generator.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vertex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_vertex_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_vertex_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Integer or numeric string on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelSet {
    /// Effective set name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNNAMED_MODEL_SUITE)
    }
}

impl Vertex {
    pub fn is_blocked(&self) -> bool {
        element_blocked(self.blocked, self.properties.as_ref())
    }
}

impl Edge {
    pub fn is_blocked(&self) -> bool {
        element_blocked(self.blocked, self.properties.as_ref())
    }
}

fn element_blocked(flag: Option<bool>, properties: Option<&Map<String, Value>>) -> bool {
    if flag == Some(true) {
        return true;
    }
    properties
        .and_then(|props| props.get("blocked"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parse one model file.
pub fn read_model_file(path: &Path) -> Result<ModelSet, ValidationError> {
    let contents = fs::read_to_string(path).map_err(|err| ValidationError {
        issues: vec![format!("Cannot read model file: {}: {}.", path.display(), err)],
    })?;
    serde_json::from_str(&contents).map_err(|err| ValidationError {
        issues: vec![format!("Invalid json file: {}: {}.", path.display(), err)],
    })
}

/// Concatenate model files into one set for the generator's `/load`.
///
/// Each model is stamped with its source file. The set name comes from the
/// first file that has one.
pub fn load_models<P: AsRef<Path>>(paths: &[P]) -> Result<ModelSet, ValidationError> {
    let mut combined = ModelSet {
        name: None,
        models: Vec::new(),
    };

    for path in paths {
        let path = path.as_ref();
        let mut set = read_model_file(path)?;

        for model in &mut set.models {
            model.source_file = Some(path.display().to_string());
        }
        combined.models.append(&mut set.models);

        if combined.name.is_none() {
            combined.name = set.name;
        }
    }

    if combined.name.is_none() {
        combined.name = Some(UNNAMED_MODEL_SUITE.to_string());
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SIMPLE: &str = r#"{
        "name": "Simple",
        "models": [
            {
                "name": "Simple",
                "generator": "random(length(3))",
                "vertices": [{"id": "v0", "name": "vertex_a", "unknownKey": 1}],
                "edges": [{"id": "e0", "name": "edge_a", "sourceVertexId": "v0", "targetVertexId": "v0"}]
            }
        ]
    }"#;

    fn write_model(dir: &Path, file: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(file);
        fs::write(&path, contents).expect("write model");
        path
    }

    #[test]
    fn parses_and_keeps_unknown_element_keys() {
        let set: ModelSet = serde_json::from_str(SIMPLE).expect("parse");
        assert_eq!(set.models.len(), 1);
        assert_eq!(set.models[0].vertices[0].extra.get("unknownKey"), Some(&Value::from(1)));
    }

    #[test]
    fn load_models_concatenates_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_model(temp.path(), "simple.json", SIMPLE);

        let set = load_models(&[&path, &path]).expect("load");
        assert_eq!(set.name.as_deref(), Some("Simple"));
        assert_eq!(set.models.len(), 2);
        assert_eq!(
            set.models[0].source_file.as_deref(),
            Some(path.display().to_string().as_str())
        );
    }

    #[test]
    fn load_models_defaults_the_suite_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_model(temp.path(), "no-name.json", r#"{"models": []}"#);

        let set = load_models(&[&path]).expect("load");
        assert_eq!(set.display_name(), UNNAMED_MODEL_SUITE);
    }

    #[test]
    fn load_models_rejects_invalid_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_model(temp.path(), "broken.json", "{,}");

        let err = load_models(&[&path]).expect_err("should fail");
        assert!(err.issues[0].contains("Invalid json file"));
    }

    #[test]
    fn blocked_flag_or_property_marks_elements() {
        let vertex: Vertex = serde_json::from_str(r#"{"id": "v0", "name": "a", "blocked": true}"#)
            .expect("parse");
        assert!(vertex.is_blocked());

        let edge: Edge = serde_json::from_str(
            r#"{"id": "e0", "name": "b", "properties": {"blocked": true}}"#,
        )
        .expect("parse");
        assert!(edge.is_blocked());

        let plain: Vertex = serde_json::from_str(r#"{"id": "v1", "name": "c"}"#).expect("parse");
        assert!(!plain.is_blocked());
    }
}
