//! GraphWalker integration: REST client, supervised online service, and
//! one-shot subcommands (`offline`, `check`, `methods`, `convert`).

mod client;
mod commands;
mod service;

pub use client::{DataValue, GraphWalkerClient};
pub use commands::{check, convert_model, methods, offline, OfflineOptions};
pub use service::{find_free_port, GraphWalkerService, ServiceOptions, DEFAULT_EXECUTABLE};

use serde_json::{Map, Value};

use crate::steps::Step;

/// Normalize a raw generator step (from `getNext` or the `offline` command).
///
/// The generator names the element fields `currentElementID` and
/// `currentElementName`, returns `data` as a list of single-entry objects,
/// and wraps each action in `{"Action": ...}`. In non-verbose mode `data`
/// and `properties` are dropped entirely.
pub(crate) fn normalize_step(mut body: Map<String, Value>, verbose: bool) -> Step {
    let mut step = Step {
        id: take_string(&mut body, "currentElementID"),
        name: take_string(&mut body, "currentElementName").unwrap_or_default(),
        model_name: take_string(&mut body, "modelName"),
        ..Step::default()
    };

    if verbose {
        if let Some(Value::Array(entries)) = body.remove("data") {
            let mut data = std::collections::BTreeMap::new();
            for entry in entries {
                if let Value::Object(map) = entry {
                    for (key, value) in map {
                        data.insert(key, value_to_string(&value));
                    }
                }
            }
            step.data = Some(data);
        }
        if let Some(Value::Object(properties)) = body.remove("properties") {
            step.properties = Some(properties);
        }
    }

    if let Some(Value::Array(actions)) = body.remove("actions") {
        let actions: Vec<String> = actions
            .into_iter()
            .filter_map(|action| match action {
                Value::Object(mut map) => match map.remove("Action") {
                    Some(Value::String(text)) => Some(text),
                    _ => None,
                },
                Value::String(text) => Some(text),
                _ => None,
            })
            .collect();
        if !actions.is_empty() {
            step.actions = Some(actions);
        }
    }

    step.number_of_elements = body
        .get("numberOfElements")
        .and_then(Value::as_u64);
    step.number_of_unvisited_elements = body
        .get("numberOfUnvisitedElements")
        .and_then(Value::as_u64);
    if let Some(Value::Array(unvisited)) = body.remove("unvisitedElements") {
        step.unvisited_elements = Some(unvisited);
    }

    step
}

fn take_string(body: &mut Map<String, Value>, key: &str) -> Option<String> {
    match body.remove(key) {
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(value_to_string(&other)),
        None => None,
    }
}

/// Coerce a wire value to its string form (the generator surface is
/// string-typed; numbers and booleans render as their JS literals).
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
