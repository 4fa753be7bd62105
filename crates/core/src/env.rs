//! Environment placeholder resolution for configuration trees.
//!
//! String scalars anywhere in a YAML tree may contain `${NAME}` (required)
//! or `${NAME:default}` (optional) placeholders. Resolution walks mappings
//! and sequences, substitutes every placeholder in every string, and leaves
//! keys and non-string scalars untouched.
//!
//! Text that does not form a complete placeholder (`${}`, `${UNCLOSED`) is
//! copied through verbatim.

use std::collections::{BTreeMap, HashMap};

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::trace;

use crate::error::{ConfigError, EnvResolutionError};

/// Source of variable values. The process environment in production,
/// a plain map in tests.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from `std::env` at call time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var_os(name).map(|v| v.to_string_lossy().into_owned())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A placeholder found in a config tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub default: Option<String>,
    /// Dotted location of the string that contains it.
    pub path: String,
}

/// Resolve all placeholders against the process environment.
pub fn resolve(value: &Value) -> Result<Value, EnvResolutionError> {
    resolve_with(value, &ProcessEnv)
}

/// Resolve all placeholders against the given environment.
pub fn resolve_with<E: EnvSource + ?Sized>(
    value: &Value,
    env: &E,
) -> Result<Value, EnvResolutionError> {
    let mut path = Vec::new();
    resolve_value(value, env, &mut path)
}

/// Resolve placeholders in a single string.
pub fn resolve_str(input: &str) -> Result<String, EnvResolutionError> {
    substitute(input, &ProcessEnv).map_err(|name| EnvResolutionError { name, path: None })
}

/// List every placeholder in the tree, in document order.
pub fn placeholders(value: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut path = Vec::new();
    collect_placeholders(value, &mut path, &mut found);
    found
}

/// Fail with every name in `names` that is absent from the process environment.
pub fn validate_required_env_vars<S: AsRef<str>>(names: &[S]) -> Result<(), ConfigError> {
    let missing: Vec<String> = names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| ProcessEnv.var(name).is_none())
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingEnvVars(missing))
    }
}

// ── Tree walk ─────────────────────────────────────────────────────

enum Segment {
    Key(String),
    Index(usize),
}

fn render_path(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            Segment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
        }
    }
    out
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "~".to_string(),
        _ => "?".to_string(),
    }
}

fn resolve_value<E: EnvSource + ?Sized>(
    value: &Value,
    env: &E,
    path: &mut Vec<Segment>,
) -> Result<Value, EnvResolutionError> {
    match value {
        Value::String(s) => substitute(s, env).map(Value::String).map_err(|name| {
            let rendered = render_path(path);
            EnvResolutionError {
                name,
                path: (!rendered.is_empty()).then_some(rendered),
            }
        }),
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                out.push(resolve_value(item, env, path)?);
                path.pop();
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, item) in map {
                path.push(Segment::Key(key_label(key)));
                let resolved = resolve_value(item, env, path)?;
                path.pop();
                out.insert(key.clone(), resolved);
            }
            Ok(Value::Mapping(out))
        }
        Value::Tagged(tagged) => {
            let inner = resolve_value(&tagged.value, env, path)?;
            Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag.clone(),
                value: inner,
            })))
        }
        other => Ok(other.clone()),
    }
}

fn collect_placeholders(value: &Value, path: &mut Vec<Segment>, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("${") {
                let after = &rest[start + 2..];
                match parse_token(after) {
                    Some((token, consumed)) => {
                        found.push(Placeholder {
                            name: token.name.to_string(),
                            default: token.default.map(str::to_string),
                            path: render_path(path),
                        });
                        rest = &after[consumed..];
                    }
                    None => rest = after,
                }
            }
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                collect_placeholders(item, path, found);
                path.pop();
            }
        }
        Value::Mapping(map) => {
            for (key, item) in map {
                path.push(Segment::Key(key_label(key)));
                collect_placeholders(item, path, found);
                path.pop();
            }
        }
        Value::Tagged(tagged) => collect_placeholders(&tagged.value, path, found),
        _ => {}
    }
}

// ── String scanning ───────────────────────────────────────────────

struct Token<'a> {
    name: &'a str,
    default: Option<&'a str>,
}

/// Parse the text following `${`. Returns the token and the number of bytes
/// consumed including the closing brace.
fn parse_token(after: &str) -> Option<(Token<'_>, usize)> {
    let close = after.find('}')?;
    let body = &after[..close];
    let (name, default) = match body.find(':') {
        Some(colon) => (&body[..colon], Some(&body[colon + 1..])),
        None => (body, None),
    };
    if name.is_empty() {
        return None;
    }
    Some((Token { name, default }, close + 1))
}

/// Substitute every placeholder in `input`. On failure returns the name of
/// the first required variable that is unset.
fn substitute<E: EnvSource + ?Sized>(input: &str, env: &E) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match parse_token(after) {
            Some((token, consumed)) => {
                let value = match (env.var(token.name), token.default) {
                    (Some(v), _) => v,
                    (None, Some(default)) => {
                        trace!(var = token.name, "env var unset, using default");
                        default.to_string()
                    }
                    (None, None) => return Err(token.name.to_string()),
                };
                out.push_str(&value);
                rest = &after[consumed..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}
