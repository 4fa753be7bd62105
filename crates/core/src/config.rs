//! YAML configuration loading.
//!
//! Documents are read as untyped [`serde_yaml::Value`] trees so placeholders can
//! be resolved before any section is deserialized into typed structs.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use tracing::debug;

use crate::env;
use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Parse a YAML document. An empty document yields an empty mapping.
pub fn parse_yaml(text: &str) -> Result<Value, ConfigError> {
    let value: Value = serde_yaml::from_str(text)?;
    Ok(match value {
        Value::Null => Value::Mapping(Default::default()),
        other => other,
    })
}

/// Read and parse a YAML file without resolving placeholders.
pub fn read_yaml(path: impl AsRef<Path>) -> Result<Value, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = content.len(), "read config file");
    parse_yaml(&content)
}

/// Load a YAML file, optionally resolving `${NAME}` placeholders.
pub fn load_config(path: impl AsRef<Path>, resolve_env: bool) -> Result<Value, ConfigError> {
    let raw = read_yaml(path)?;
    if resolve_env {
        Ok(env::resolve(&raw)?)
    } else {
        Ok(raw)
    }
}

/// Load a YAML file and resolve placeholders against the process environment.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Value, ConfigError> {
    load_config(path, true)
}

/// Deserialize the top-level `key` section of a document.
///
/// Returns `Ok(None)` when the section is absent or null.
pub fn section<T: DeserializeOwned>(doc: &Value, key: &str) -> Result<Option<T>, ConfigError> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_empty_mapping() {
        let doc = parse_yaml("").unwrap();
        assert!(doc.as_mapping().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = read_yaml("/definitely/not/here/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn load_with_and_without_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "host: ${AGENTYARD_CFG_TEST_HOST:localhost}\n").unwrap();

        let raw = load_config(&path, false).unwrap();
        assert_eq!(raw["host"].as_str(), Some("${AGENTYARD_CFG_TEST_HOST:localhost}"));

        let resolved = load_config_with_env(&path).unwrap();
        assert_eq!(resolved["host"].as_str(), Some("localhost"));
    }

    #[test]
    fn missing_required_var_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "tools:\n  t:\n    key: ${AGENTYARD_CFG_TEST_UNSET_KEY}\n").unwrap();

        match load_config_with_env(&path).unwrap_err() {
            ConfigError::Env(e) => {
                assert_eq!(e.name, "AGENTYARD_CFG_TEST_UNSET_KEY");
                assert_eq!(e.path.as_deref(), Some("tools.t.key"));
            }
            other => panic!("expected Env error, got: {other:?}"),
        }
    }

    #[test]
    fn section_reports_key_on_shape_error() {
        let doc = parse_yaml("limits: [1, 2]\n").unwrap();
        let err = section::<std::collections::HashMap<String, u32>>(&doc, "limits").unwrap_err();
        match err {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "limits"),
            other => panic!("expected Invalid, got: {other:?}"),
        }
        assert!(section::<Vec<u32>>(&doc, "absent").unwrap().is_none());
    }
}
