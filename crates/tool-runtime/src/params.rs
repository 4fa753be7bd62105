//! Declared tool parameters (`config.params`) and the helpers that turn them
//! into JSON Schema and argument documentation.
//!
//! Declarations only drive what the agent runtime is told about a tool; calls
//! are not type-checked against them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One entry of a tool's `params` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Loose type name: string/str, int/integer, float/number, bool/boolean,
    /// list/array, dict/object, any.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    /// Present (even as `null`) means the parameter has a default.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

fn default_kind() -> String {
    "any".to_string()
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl ParamSpec {
    /// Explicit `required` wins; otherwise a parameter without default is required.
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }

    /// JSON Schema type for the declared kind; `None` for `any` and unknown kinds.
    pub fn json_type(&self) -> Option<&'static str> {
        match self.kind.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Some("string"),
            "int" | "integer" => Some("integer"),
            "float" | "number" => Some("number"),
            "bool" | "boolean" => Some("boolean"),
            "list" | "array" => Some("array"),
            "dict" | "object" => Some("object"),
            _ => None,
        }
    }
}

/// Build an object schema from declared parameters.
pub fn schema_for(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut prop = Map::new();
        if let Some(ty) = param.json_type() {
            prop.insert("type".into(), Value::String(ty.into()));
        }
        if !param.description.is_empty() {
            prop.insert("description".into(), Value::String(param.description.clone()));
        }
        if let Some(default) = &param.default {
            prop.insert("default".into(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.is_required() {
            required.push(Value::String(param.name.clone()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Tool description with an `Args:` block documenting each parameter.
pub fn describe(description: &str, params: &[ParamSpec]) -> String {
    if params.is_empty() {
        return description.to_string();
    }

    let mut out = String::from(description);
    out.push_str("\n\nArgs:");
    for param in params {
        out.push_str(&format!(
            "\n    {} ({}): {}",
            param.name, param.kind, param.description
        ));
        if let Some(default) = &param.default {
            let shown = match default {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!(" Defaults to {shown}."));
        }
    }
    out
}

// ── Invocation argument accessors ─────────────────────────────────

pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn u64_param(params: &Value, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Object-valued argument; absent or null yields an empty map.
pub(crate) fn object_param(
    params: &Value,
    key: &str,
) -> Result<Map<String, Value>, crate::tool::ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(crate::tool::ToolError::InvalidInput(format!(
            "'{key}' must be an object, got {other}"
        ))),
    }
}

/// Render an argument value as plain text (strings without quotes).
pub(crate) fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
