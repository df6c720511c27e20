//! Code-versus-model conformance: ask the executor whether every model and
//! step method exists, and report the misses.

use anyhow::{Context, Result};
use minijinja::{context, Environment};
use serde::Serialize;

use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::model::ModelSet;

const PYTHON_STUBS: &str = include_str!("../templates/python_stubs.jinja");
const DOTNET_STUBS: &str = include_str!("../templates/dotnet_stubs.jinja");

/// The step methods a model requires, declaration order, first occurrence
/// wins on duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMethods {
    pub model: String,
    pub methods: Vec<String>,
}

/// Misses for one model. `missing_model` means the class itself was not
/// found; `methods` lists the absent step methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingMethods {
    #[serde(rename = "name")]
    pub model: String,
    pub missing_model: bool,
    pub methods: Vec<String>,
}

/// Languages the verifier can suggest stubs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionLanguage {
    Python,
    Dotnet,
}

/// Collect the required methods per model: every non-empty vertex and edge
/// name, optionally skipping blocked elements.
pub fn get_methods(set: &ModelSet, skip_blocked: bool) -> Vec<ModelMethods> {
    set.models
        .iter()
        .map(|model| {
            let mut methods = Vec::new();
            let mut push = |name: Option<&str>| {
                if let Some(name) = name {
                    if !name.is_empty() && !methods.iter().any(|existing| existing == name) {
                        methods.push(name.to_string());
                    }
                }
            };
            for vertex in &model.vertices {
                if !(skip_blocked && vertex.is_blocked()) {
                    push(vertex.name.as_deref());
                }
            }
            for edge in &model.edges {
                if !(skip_blocked && edge.is_blocked()) {
                    push(edge.name.as_deref());
                }
            }
            ModelMethods {
                model: model.name.clone(),
                methods,
            }
        })
        .collect()
}

/// Query the executor for every model and method; return only the models
/// with misses, declaration order throughout. Present-but-unknown code never
/// triggers a warning.
pub fn get_missing_methods(
    executor: &mut dyn Executor,
    methods: &[ModelMethods],
) -> Result<Vec<MissingMethods>, ExecutorError> {
    let mut missing = Vec::new();

    for entry in methods {
        let has_model = executor.has_model(&entry.model)?;
        let mut absent = Vec::new();
        for method in &entry.methods {
            if !executor.has_step(Some(&entry.model), method)? {
                absent.push(method.clone());
            }
        }
        if !has_model || !absent.is_empty() {
            missing.push(MissingMethods {
                model: entry.model.clone(),
                missing_model: !has_model,
                methods: absent,
            });
        }
    }

    Ok(missing)
}

/// Human-readable miss report, one line per finding.
pub fn format_missing(missing: &[MissingMethods]) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in missing {
        if entry.missing_model {
            lines.push(format!("Expected to find class {}.", entry.model));
        }
        for method in &entry.methods {
            lines.push(format!(
                "Expected to find {} method in class {}.",
                method, entry.model
            ));
        }
    }
    lines
}

/// Ready-to-paste stubs for the missing methods.
pub fn suggest_stubs(missing: &[MissingMethods], language: SuggestionLanguage) -> Result<String> {
    let template = match language {
        SuggestionLanguage::Python => PYTHON_STUBS,
        SuggestionLanguage::Dotnet => DOTNET_STUBS,
    };

    let mut env = Environment::new();
    env.add_template("stubs", template)
        .context("compile stub template")?;
    let rendered = env
        .get_template("stubs")
        .context("load stub template")?
        .render(context! { models => missing })
        .context("render stub template")?;
    Ok(rendered.trim_start_matches('\n').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedExecutor;

    fn model_set() -> ModelSet {
        serde_json::from_str(
            r#"{
                "models": [
                    {
                        "name": "Login",
                        "vertices": [
                            {"id": "v0", "name": "v_home"},
                            {"id": "v1", "name": "v_home"},
                            {"id": "v2", "name": ""}
                        ],
                        "edges": [
                            {"id": "e0", "name": "e_open", "sourceVertexId": "v0", "targetVertexId": "v1"},
                            {"id": "e1", "name": "e_blocked", "sourceVertexId": "v0", "targetVertexId": "v1", "blocked": true}
                        ]
                    }
                ]
            }"#,
        )
        .expect("parse model set")
    }

    #[test]
    fn methods_are_unique_and_in_declaration_order() {
        let methods = get_methods(&model_set(), false);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].model, "Login");
        assert_eq!(methods[0].methods, vec!["v_home", "e_open", "e_blocked"]);
    }

    #[test]
    fn blocked_elements_can_be_skipped() {
        let methods = get_methods(&model_set(), true);
        assert_eq!(methods[0].methods, vec!["v_home", "e_open"]);
    }

    #[test]
    fn reports_missing_model_and_methods() {
        let mut executor = ScriptedExecutor::new()
            .with_model("Login")
            .with_step(Some("Login"), "v_home");
        let methods = get_methods(&model_set(), false);

        let missing = get_missing_methods(&mut executor, &methods).expect("verify");
        assert_eq!(missing.len(), 1);
        assert!(!missing[0].missing_model);
        assert_eq!(missing[0].methods, vec!["e_open", "e_blocked"]);

        let lines = format_missing(&missing);
        assert_eq!(
            lines,
            vec![
                "Expected to find e_open method in class Login.",
                "Expected to find e_blocked method in class Login.",
            ]
        );
    }

    #[test]
    fn complete_code_yields_no_misses() {
        let mut executor = ScriptedExecutor::new()
            .with_model("Login")
            .with_step(Some("Login"), "v_home")
            .with_step(Some("Login"), "e_open")
            .with_step(Some("Login"), "e_blocked");
        let methods = get_methods(&model_set(), false);

        let missing = get_missing_methods(&mut executor, &methods).expect("verify");
        assert!(missing.is_empty());
    }

    #[test]
    fn python_stubs_render_missing_classes() {
        let missing = vec![MissingMethods {
            model: "Login".to_string(),
            missing_model: true,
            methods: vec!["v_home".to_string(), "e_open".to_string()],
        }];
        let stubs = suggest_stubs(&missing, SuggestionLanguage::Python).expect("render");
        assert!(stubs.contains("class Login:"));
        assert!(stubs.contains("def v_home(self):"));
        assert!(stubs.contains("def e_open(self):"));
    }

    #[test]
    fn dotnet_stubs_render_method_bodies() {
        let missing = vec![MissingMethods {
            model: "Login".to_string(),
            missing_model: false,
            methods: vec!["e_open".to_string()],
        }];
        let stubs = suggest_stubs(&missing, SuggestionLanguage::Dotnet).expect("render");
        assert!(stubs.contains("// Add to class Login:"));
        assert!(stubs.contains("public void e_open()"));
    }
}
