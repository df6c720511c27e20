//! Blocking client for the GraphWalker REST service.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::blocking::Response;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::GeneratorError;
use crate::graphwalker::{normalize_step, value_to_string};
use crate::model::ModelSet;
use crate::steps::Step;

/// Timeout for quick control requests; `getNext` waits indefinitely because
/// path generation over large models can be slow.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// A value accepted by `setData`, encoded to its JavaScript literal on the
/// wire: `"s"`, `42`, `true`.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl DataValue {
    /// Best-effort conversion from an executor's JSON data value. Strings,
    /// integers, and booleans keep their type; anything else is carried as
    /// its JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::String(text.clone()),
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => Self::Integer(int),
                None => Self::String(number.to_string()),
            },
            other => Self::String(other.to_string()),
        }
    }

    fn to_js_literal(&self) -> String {
        match self {
            Self::String(text) => format!("\"{text}\""),
            Self::Integer(int) => int.to_string(),
            Self::Bool(true) => "true".to_string(),
            Self::Bool(false) => "false".to_string(),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_literal())
    }
}

pub struct GraphWalkerClient {
    base: String,
    http: reqwest::blocking::Client,
    verbose: bool,
}

impl GraphWalkerClient {
    /// `verbose` keeps `data` and `properties` on steps returned by
    /// [`GraphWalkerClient::get_next`]; the service itself always runs
    /// verbose so `modelName` is available.
    pub fn new(host: &str, port: u16, verbose: bool) -> Result<Self, GeneratorError> {
        let http = reqwest::blocking::Client::builder().build()?;
        let base = format!("http://{host}:{port}/graphwalker");
        debug!(%base, "initializing GraphWalker client");
        Ok(Self { base, http, verbose })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// POST the combined model set at `/load`.
    pub fn load(&self, models: &ModelSet) -> Result<(), GeneratorError> {
        debug!(base = %self.base, "loading models");
        let response = self
            .http
            .post(format!("{}/load", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(models)
            .send()?;
        self.parse_envelope(response)?;
        Ok(())
    }

    /// GET `/hasNext`. True while the stop conditions are unfulfilled.
    pub fn has_next(&self) -> Result<bool, GeneratorError> {
        let body = self.get("hasNext", Some(CONTROL_TIMEOUT))?;
        match body.get("hasNext") {
            Some(Value::String(text)) => Ok(text == "true"),
            Some(Value::Bool(flag)) => Ok(*flag),
            _ => Err(GeneratorError::MalformedResponse(
                "hasNext missing from response".to_string(),
            )),
        }
    }

    /// GET `/getNext`, normalized.
    pub fn get_next(&self) -> Result<Step, GeneratorError> {
        let body = self.get("getNext", None)?;
        Ok(normalize_step(body, self.verbose))
    }

    /// GET `/getData`. Values are coerced to strings: the generator surface
    /// is string-typed and the test code re-parses what it needs.
    pub fn get_data(&self) -> Result<BTreeMap<String, String>, GeneratorError> {
        let body = self.get("getData", Some(CONTROL_TIMEOUT))?;
        match body.get("data") {
            Some(Value::Object(data)) => Ok(data
                .iter()
                .map(|(key, value)| (key.clone(), value_to_string(value)))
                .collect()),
            _ => Err(GeneratorError::MalformedResponse(
                "data missing from response".to_string(),
            )),
        }
    }

    /// PUT `/setData/<key>=<js-literal>`.
    pub fn set_data(&self, key: &str, value: &DataValue) -> Result<(), GeneratorError> {
        debug!(key, %value, "setting graph data");
        let path = format!(
            "setData/{}={}",
            encode_component(key),
            encode_component(&value.to_js_literal())
        );
        self.put(&path)?;
        Ok(())
    }

    /// PUT `/restart`: reset the loaded models and the statistics.
    pub fn restart(&self) -> Result<(), GeneratorError> {
        self.put("restart")?;
        Ok(())
    }

    /// PUT `/fail/<message>`: mark the current step failed in the statistics.
    pub fn fail(&self, message: &str) -> Result<(), GeneratorError> {
        let message = if message.is_empty() {
            "Unknown error."
        } else {
            message
        };
        debug!(message, "reporting failure to GraphWalker");
        let path = format!("fail/{}", encode_component(message));
        self.put(&path)?;
        Ok(())
    }

    /// GET `/getStatistics`.
    pub fn get_statistics(&self) -> Result<Value, GeneratorError> {
        let body = self.get("getStatistics", Some(CONTROL_TIMEOUT))?;
        Ok(Value::Object(body))
    }

    fn get(
        &self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<Map<String, Value>, GeneratorError> {
        let mut request = self.http.get(format!("{}/{path}", self.base));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        self.parse_envelope(request.send()?)
    }

    fn put(&self, path: &str) -> Result<Map<String, Value>, GeneratorError> {
        let response = self
            .http
            .put(format!("{}/{path}", self.base))
            .timeout(CONTROL_TIMEOUT)
            .send()?;
        self.parse_envelope(response)
    }

    /// Check the HTTP status and the `result` success flag, returning the
    /// rest of the body. Failure envelopes carry their message in `error`.
    fn parse_envelope(&self, response: Response) -> Result<Map<String, Value>, GeneratorError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GeneratorError::Status(status.as_u16()));
        }

        let text = response.text()?;
        let mut body: Map<String, Value> = serde_json::from_str(&text).map_err(|err| {
            GeneratorError::MalformedResponse(format!("{err}: {}", text_preview(&text)))
        })?;

        match body.remove("result") {
            Some(Value::String(result)) if result == "ok" => Ok(body),
            _ => match body.get("error") {
                Some(error) => Err(GeneratorError::Envelope(value_to_string(error))),
                None => Err(GeneratorError::Envelope("nok status".to_string())),
            },
        }
    }
}

fn text_preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(120)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    &text[..end]
}

/// Percent-encode a URL path component (everything but unreserved chars).
fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            other => {
                encoded.push_str(&format!("%{other:02X}"));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_values_encode_to_js_literals() {
        assert_eq!(DataValue::String("s".to_string()).to_js_literal(), "\"s\"");
        assert_eq!(DataValue::Integer(42).to_js_literal(), "42");
        assert_eq!(DataValue::Bool(true).to_js_literal(), "true");
        assert_eq!(DataValue::Bool(false).to_js_literal(), "false");
    }

    #[test]
    fn data_values_from_json_keep_wire_types() {
        assert_eq!(
            DataValue::from_json(&Value::from("x")),
            DataValue::String("x".to_string())
        );
        assert_eq!(DataValue::from_json(&Value::from(3)), DataValue::Integer(3));
        assert_eq!(DataValue::from_json(&Value::from(true)), DataValue::Bool(true));
        assert_eq!(
            DataValue::from_json(&Value::from(1.5)),
            DataValue::String("1.5".to_string())
        );
    }

    #[test]
    fn encode_component_escapes_reserved_characters() {
        assert_eq!(encode_component("plain_Key-1.~"), "plain_Key-1.~");
        assert_eq!(encode_component("\"hello world\""), "%22hello%20world%22");
        assert_eq!(encode_component("a/b=c"), "a%2Fb%3Dc");
    }
}
