//! Structural and semantic model-set validation.
//!
//! Structural validation checks a raw model file against a JSON Schema:
//! required fields and field types, unknown top-level keys rejected, unknown
//! per-element keys accepted (the generator may understand more than we do).
//! Semantic validation runs on the parsed [`ModelSet`] and collects every
//! violation instead of failing fast, ordered by (model, element) so output
//! is stable.

use std::collections::HashSet;

use jsonschema::Draft;
use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{Edge, Model, ModelSet, Vertex};

const MODELS_SCHEMA: &str = include_str!("../schemas/models.schema.json");

/// Lowercased reserved words of the supported test languages. A model element
/// named after any of these cannot become a method identifier everywhere.
pub const PYTHON_KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "false", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "none", "nonlocal", "not", "or", "pass", "raise", "return", "true", "try", "while",
    "with", "yield",
];

pub const CSHARP_KEYWORDS: &[&str] = &[
    "abstract", "add", "alias", "as", "ascending", "async", "await", "base", "bool", "break", "by",
    "byte", "case", "catch", "char", "checked", "class", "const", "continue", "decimal", "default",
    "delegate", "descending", "do", "double", "dynamic", "else", "enum", "equals", "event",
    "explicit", "extern", "false", "finally", "fixed", "float", "for", "foreach", "from", "get",
    "global", "goto", "group", "if", "implicit", "in", "int", "interface", "internal", "into",
    "is", "join", "let", "lock", "long", "nameof", "namespace", "new", "null", "object", "on",
    "operator", "orderby", "out", "override", "params", "partial", "private", "protected",
    "public", "readonly", "ref", "remove", "return", "sbyte", "sealed", "select", "set", "short",
    "static", "struct", "switch", "this", "throw", "true", "try", "typeof", "uint", "ulong",
    "unchecked", "value", "var", "virtual", "void", "volatile", "when", "where", "while", "yield",
];

/// True if `name` is a reserved word in any supported language.
pub fn is_keyword(name: &str) -> bool {
    let normalized = name.to_lowercase();
    PYTHON_KEYWORDS.contains(&normalized.as_str()) || CSHARP_KEYWORDS.contains(&normalized.as_str())
}

/// True if `name` is a valid method identifier in every supported language.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Validation issues grouped for display: file/set level first, then one
/// bucket per model in declaration order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Issues {
    pub global: Vec<String>,
    pub per_model: Vec<ModelIssues>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIssues {
    /// `"<name> (<id>)"`, or just the name when the model has no id.
    pub label: String,
    pub issues: Vec<String>,
}

impl Issues {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.per_model.iter().all(|m| m.issues.is_empty())
    }

    /// All messages in reporting order.
    pub fn flatten(&self) -> Vec<String> {
        let mut all = self.global.clone();
        for model in &self.per_model {
            for issue in &model.issues {
                all.push(format!("{}: {}", model.label, issue));
            }
        }
        all
    }

    pub fn into_error(self) -> Option<ValidationError> {
        if self.is_empty() {
            None
        } else {
            Some(ValidationError {
                issues: self.flatten(),
            })
        }
    }
}

/// Structural validation of a raw model file.
pub fn validate_schema(raw: &[u8]) -> Result<Value, ValidationError> {
    let instance: Value = serde_json::from_slice(raw).map_err(|err| ValidationError {
        issues: vec![format!("Invalid json: {err}.")],
    })?;

    let schema: Value = serde_json::from_str(MODELS_SCHEMA).map_err(|err| ValidationError {
        issues: vec![format!("Invalid bundled schema: {err}.")],
    })?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ValidationError {
            issues: vec![format!("Cannot compile bundled schema: {err}.")],
        })?;

    let issues: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| format!("{} at {}", err, err.instance_path))
        .collect();

    if issues.is_empty() {
        Ok(instance)
    } else {
        Err(ValidationError { issues })
    }
}

/// Semantic validation of a parsed model set, §3 invariants.
pub fn validate_model_set(set: &ModelSet) -> Issues {
    let mut issues = Issues::default();

    if set.models.is_empty() {
        issues.global.push("No models found.".to_string());
        return issues;
    }

    let mut seen_ids = HashSet::new();
    for model in &set.models {
        let label = match &model.id {
            Some(id) => format!("{} ({})", model.name, id),
            None => model.name.clone(),
        };
        let mut bucket = Vec::new();
        validate_model(model, &mut seen_ids, &mut bucket);
        issues.per_model.push(ModelIssues {
            label,
            issues: bucket,
        });
    }

    issues
}

fn validate_model(model: &Model, seen_ids: &mut HashSet<String>, issues: &mut Vec<String>) {
    if model.name.is_empty() {
        issues.push("Each model must have a name.".to_string());
    } else {
        validate_element_name(&model.name, issues);
    }

    validate_actions("Model", model.name.as_str(), &model.actions, issues);

    let vertex_ids: HashSet<&str> = model
        .vertices
        .iter()
        .filter_map(|vertex| vertex.id.as_deref())
        .collect();

    for vertex in &model.vertices {
        validate_vertex(vertex, seen_ids, issues);
    }
    for edge in &model.edges {
        let is_start_element = edge.id.is_some() && edge.id == model.start_element_id;
        validate_edge(edge, &vertex_ids, is_start_element, seen_ids, issues);
    }

    if let Some(start) = &model.start_element_id {
        let in_vertices = vertex_ids.contains(start.as_str());
        let in_edges = model.edges.iter().any(|edge| edge.id.as_ref() == Some(start));
        if !in_vertices && !in_edges {
            issues.push(format!("Starting element '{start}' was not found."));
        }
    }
}

fn validate_vertex(vertex: &Vertex, seen_ids: &mut HashSet<String>, issues: &mut Vec<String>) {
    match vertex.id.as_deref() {
        None | Some("") => issues.push("Each vertex must have an id.".to_string()),
        Some(id) => {
            if !seen_ids.insert(id.to_string()) {
                issues.push(format!("Duplicate id: '{id}'."));
            }
        }
    }

    // Empty or missing names mark anonymous vertices; those are never
    // dispatched, so only non-empty names must be identifiers.
    if let Some(name) = vertex.name.as_deref() {
        if !name.is_empty() {
            validate_element_name(name, issues);
        }
    }

    if let (Some(id), Some(requirements)) = (vertex.id.as_deref(), vertex.requirements.as_ref()) {
        for requirement in requirements {
            if requirement.is_empty() {
                issues.push(format!(
                    "Vertex '{id}' has an invalid requirement. Requirement cannot be an empty string."
                ));
            }
        }
    }
}

fn validate_edge(
    edge: &Edge,
    vertex_ids: &HashSet<&str>,
    is_start_element: bool,
    seen_ids: &mut HashSet<String>,
    issues: &mut Vec<String>,
) {
    let id = match edge.id.as_deref() {
        None | Some("") => {
            issues.push("Each edge must have an id.".to_string());
            return;
        }
        Some(id) => {
            if !seen_ids.insert(id.to_string()) {
                issues.push(format!("Duplicate id: '{id}'."));
            }
            id
        }
    };

    if let Some(name) = edge.name.as_deref() {
        if !name.is_empty() {
            validate_element_name(name, issues);
        }
    }

    match edge.source_vertex_id.as_deref() {
        None | Some("") => {
            if !is_start_element {
                issues.push(format!(
                    "Edge '{id}' is not a start element and it doesn't have a sourceVertexId."
                ));
            }
        }
        Some(source) => {
            if !vertex_ids.contains(source) {
                issues.push(format!("Edge '{id}' has an unknown sourceVertexId: '{source}'."));
            }
        }
    }

    match edge.target_vertex_id.as_deref() {
        None | Some("") => issues.push(format!("Edge '{id}' doesn't have a targetVertexId.")),
        Some(target) => {
            if !vertex_ids.contains(target) {
                issues.push(format!("Edge '{id}' has an unknown targetVertexId: '{target}'."));
            }
        }
    }

    if let Some(weight) = edge.weight {
        if !(0.0..=1.0).contains(&weight) {
            issues.push(format!(
                "Edge '{id}' has an invalid weight of: {weight}. The weight must be a value between 0 and 1."
            ));
        }
    }

    if let Some(dependency) = &edge.dependency {
        let valid = match dependency {
            Value::Number(number) => number.is_i64() || number.is_u64(),
            Value::String(text) => text.parse::<i64>().is_ok(),
            _ => false,
        };
        if !valid {
            issues.push(format!(
                "Edge '{id}' has an invalid dependency of: {dependency}. The dependency must be a valid integer number."
            ));
        }
    }

    if let Some(actions) = &edge.actions {
        validate_actions("Edge", id, actions, issues);
    }
}

fn validate_element_name(name: &str, issues: &mut Vec<String>) {
    if is_keyword(name) {
        issues.push(format!("Name '{name}' is a reserve keyword."));
    } else if !is_identifier(name) {
        issues.push(format!("Name '{name}' is not a valid identifier."));
    }
}

fn validate_actions(kind: &str, id: &str, actions: &[String], issues: &mut Vec<String>) {
    for action in actions {
        if action.trim().is_empty() {
            issues.push(format!(
                "{kind} '{id}' has an invalid action. Action cannot be an empty string."
            ));
        } else if !action.trim_end().ends_with(';') {
            issues.push(format!(
                "{kind} '{id}' has an invalid action. Each action must end with ';'."
            ));
        }
    }
}

/// Resolve the generator expression for a model: the command-line expression
/// when one was given, the model's own `generator` otherwise. Exactly one of
/// the two must be available.
pub fn resolve_generator(model: &Model, cli_expression: Option<&str>) -> Result<String, String> {
    match (cli_expression, model.generator.as_deref()) {
        (Some(expression), None) => Ok(expression.to_string()),
        (None, Some(expression)) => Ok(expression.to_string()),
        (Some(_), Some(_)) => Err(format!(
            "Model '{}' has a generator and one was also given on the command line.",
            model.name
        )),
        (None, None) => Err(format!(
            "Model '{}' has no generator and none was given on the command line.",
            model.name
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(models: &str) -> ModelSet {
        serde_json::from_str(models).expect("parse model set")
    }

    #[test]
    fn identifiers() {
        for name in ["method_A", "Method_A", "Method_1", "_private"] {
            assert!(is_identifier(name), "{name}");
        }
        for name in ["0_method", "method a", "", " method", "method!", "met-hod"] {
            assert!(!is_identifier(name), "{name}");
        }
    }

    #[test]
    fn keywords_of_both_languages_are_reserved() {
        assert!(is_keyword("return"));
        assert!(is_keyword("Return"));
        assert!(is_keyword("yield"));
        assert!(is_keyword("namespace"));
        assert!(!is_keyword("not_a_keyword"));
    }

    #[test]
    fn schema_rejects_unknown_top_level_keys() {
        let raw = br#"{"models": [], "unknown": 1}"#;
        let err = validate_schema(raw).expect_err("should fail");
        assert!(err.issues.iter().any(|issue| issue.contains("unknown")));
    }

    #[test]
    fn schema_accepts_unknown_element_keys() {
        let raw = br#"{
            "models": [
                {"name": "M", "vertices": [{"id": "v0", "name": "a", "custom": 1}], "edges": []}
            ]
        }"#;
        assert!(validate_schema(raw).is_ok());
    }

    #[test]
    fn schema_requires_models() {
        let err = validate_schema(br#"{"name": "x"}"#).expect_err("should fail");
        assert!(!err.issues.is_empty());
    }

    #[test]
    fn empty_model_set_is_invalid() {
        let issues = validate_model_set(&parse(r#"{"models": []}"#));
        assert_eq!(issues.global, vec!["No models found.".to_string()]);
    }

    #[test]
    fn edges_must_resolve_within_their_model() {
        let set = parse(
            r#"{"models": [
                {
                    "name": "M",
                    "vertices": [{"id": "v0", "name": "a"}],
                    "edges": [
                        {"id": "e0", "name": "e", "sourceVertexId": "v0", "targetVertexId": "missing"}
                    ]
                }
            ]}"#,
        );
        let issues = validate_model_set(&set);
        assert_eq!(
            issues.per_model[0].issues,
            vec!["Edge 'e0' has an unknown targetVertexId: 'missing'.".to_string()]
        );
    }

    #[test]
    fn duplicate_ids_across_models_are_reported() {
        let set = parse(
            r#"{"models": [
                {"name": "A", "vertices": [{"id": "v0", "name": "a"}], "edges": []},
                {"name": "B", "vertices": [{"id": "v0", "name": "b"}], "edges": []}
            ]}"#,
        );
        let issues = validate_model_set(&set);
        assert_eq!(issues.per_model[1].issues, vec!["Duplicate id: 'v0'.".to_string()]);
    }

    #[test]
    fn keyword_and_invalid_names_are_reported_in_order() {
        let set = parse(
            r#"{"models": [
                {
                    "name": "M",
                    "vertices": [
                        {"id": "v0", "name": "return"},
                        {"id": "v1", "name": "bad name"}
                    ],
                    "edges": []
                }
            ]}"#,
        );
        let issues = validate_model_set(&set);
        assert_eq!(
            issues.per_model[0].issues,
            vec![
                "Name 'return' is a reserve keyword.".to_string(),
                "Name 'bad name' is not a valid identifier.".to_string(),
            ]
        );
    }

    #[test]
    fn anonymous_vertices_are_allowed() {
        let set = parse(
            r#"{"models": [
                {"name": "M", "vertices": [{"id": "v0", "name": ""}], "edges": []}
            ]}"#,
        );
        assert!(validate_model_set(&set).is_empty());
    }

    #[test]
    fn start_element_must_exist() {
        let set = parse(
            r#"{"models": [
                {
                    "name": "M",
                    "startElementId": "v9",
                    "vertices": [{"id": "v0", "name": "a"}],
                    "edges": []
                }
            ]}"#,
        );
        let issues = validate_model_set(&set);
        assert_eq!(
            issues.per_model[0].issues,
            vec!["Starting element 'v9' was not found.".to_string()]
        );
    }

    #[test]
    fn edge_as_start_element_may_omit_source() {
        let set = parse(
            r#"{"models": [
                {
                    "name": "M",
                    "startElementId": "e0",
                    "vertices": [{"id": "v0", "name": "a"}],
                    "edges": [{"id": "e0", "name": "e", "targetVertexId": "v0"}]
                }
            ]}"#,
        );
        assert!(validate_model_set(&set).is_empty());
    }

    #[test]
    fn actions_must_end_with_semicolon() {
        let set = parse(
            r#"{"models": [
                {
                    "name": "M",
                    "actions": ["count = 0;"],
                    "vertices": [{"id": "v0", "name": "a"}],
                    "edges": [
                        {
                            "id": "e0",
                            "name": "e",
                            "sourceVertexId": "v0",
                            "targetVertexId": "v0",
                            "actions": ["count++"]
                        }
                    ]
                }
            ]}"#,
        );
        let issues = validate_model_set(&set);
        assert_eq!(
            issues.per_model[0].issues,
            vec!["Edge 'e0' has an invalid action. Each action must end with ';'.".to_string()]
        );
    }

    #[test]
    fn invalid_weight_and_dependency_are_reported() {
        let set = parse(
            r#"{"models": [
                {
                    "name": "M",
                    "vertices": [{"id": "v0", "name": "a"}],
                    "edges": [
                        {
                            "id": "e0",
                            "name": "e",
                            "sourceVertexId": "v0",
                            "targetVertexId": "v0",
                            "weight": 1.5,
                            "dependency": "1.1"
                        }
                    ]
                }
            ]}"#,
        );
        let issues = validate_model_set(&set);
        assert_eq!(issues.per_model[0].issues.len(), 2);
        assert!(issues.per_model[0].issues[0].contains("invalid weight"));
        assert!(issues.per_model[0].issues[1].contains("invalid dependency"));
    }

    #[test]
    fn generator_resolution_needs_exactly_one_source() {
        let model: Model =
            serde_json::from_str(r#"{"name": "M", "generator": "random(never)"}"#).expect("parse");
        assert!(resolve_generator(&model, None).is_ok());
        assert!(resolve_generator(&model, Some("random(length(5))")).is_err());

        let bare: Model = serde_json::from_str(r#"{"name": "M"}"#).expect("parse");
        assert!(resolve_generator(&bare, Some("random(length(5))")).is_ok());
        assert!(resolve_generator(&bare, None).is_err());
    }

    #[test]
    fn issues_flatten_keeps_model_order() {
        let set = parse(
            r#"{"models": [
                {"name": "A", "vertices": [{"name": "a"}], "edges": []},
                {"name": "B", "vertices": [{"name": "b"}], "edges": []}
            ]}"#,
        );
        let flat = validate_model_set(&set).flatten();
        assert_eq!(
            flat,
            vec![
                "A: Each vertex must have an id.".to_string(),
                "B: Each vertex must have an id.".to_string(),
            ]
        );
    }
}
