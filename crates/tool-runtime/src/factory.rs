//! Tool declarations and the table that maps a declaration's `class` tag to
//! a constructor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::params::ParamSpec;
use crate::tool::{Tool, ToolError};
use crate::tools;

/// One entry of the `tools` mapping in a config document.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    /// The mapping key; filled in by the registry.
    #[serde(skip)]
    pub name: String,
    /// Factory tag or legacy class path.
    #[serde(rename = "class")]
    pub class_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default = "default_enabled",
        deserialize_with = "agentyard_core::de::bool_lenient"
    )]
    pub enabled: bool,
    /// Constructor arguments, interpreted by the variant.
    #[serde(default)]
    pub config: Value,
}

fn default_enabled() -> bool {
    true
}

impl ToolSpec {
    pub fn new(name: &str, class_path: &str, config: Value) -> Self {
        Self {
            name: name.to_string(),
            class_path: class_path.to_string(),
            description: String::new(),
            enabled: true,
            config,
        }
    }

    /// Deserialize `config` into a variant's typed config struct.
    /// A missing config behaves like an empty mapping.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        let value = match &self.config {
            Value::Null => Value::Mapping(Mapping::new()),
            other => other.clone(),
        };
        serde_yaml::from_value(value).map_err(|e| ToolError::InvalidConfig(e.to_string()))
    }

    /// Declared `config.params`, empty when absent.
    pub fn params(&self) -> Result<Vec<ParamSpec>, ToolError> {
        match self.config.get("params") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_yaml::from_value(value.clone())
                .map_err(|e| ToolError::InvalidConfig(format!("params: {e}"))),
        }
    }
}

/// Name, description and declared params shared by every built-in variant.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolMeta {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        Ok(Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            params: spec.params()?,
        })
    }
}

/// Builds a tool instance from its declaration.
pub type ToolConstructor =
    Arc<dyn Fn(&ToolSpec) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync>;

/// Explicit registration table: class tag → constructor.
#[derive(Clone, Default)]
pub struct FactoryTable {
    constructors: HashMap<String, ToolConstructor>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in variant, under its short tag and legacy class path.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        tools::register_builtin(&mut table);
        table
    }

    /// Register a constructor under `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: &str, constructor: F) -> &mut Self
    where
        F: Fn(&ToolSpec) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(tag.to_string(), Arc::new(constructor));
        self
    }

    /// Make `alias` resolve to the constructor registered under `target`.
    /// Returns false if `target` is unknown.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        match self.constructors.get(target).cloned() {
            Some(ctor) => {
                self.constructors.insert(alias.to_string(), ctor);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, tag: &str) -> Option<ToolConstructor> {
        self.constructors.get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.constructors.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryTable")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::EchoTool;

    #[test]
    fn spec_defaults() {
        let spec: ToolSpec = serde_yaml::from_str("class: echo\n").unwrap();
        assert!(spec.enabled);
        assert!(spec.description.is_empty());
        assert!(spec.params().unwrap().is_empty());
    }

    #[test]
    fn enabled_accepts_substituted_string() {
        let spec: ToolSpec = serde_yaml::from_str("class: echo\nenabled: 'false'\n").unwrap();
        assert!(!spec.enabled);
    }

    #[test]
    fn params_are_read_from_config() {
        let spec: ToolSpec = serde_yaml::from_str(
            "class: echo\nconfig:\n  params:\n    - {name: path, type: string}\n",
        )
        .unwrap();
        let params = spec.params().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "path");
    }

    #[test]
    fn register_and_alias() {
        let mut table = FactoryTable::new();
        table.register("echo", |spec| Ok(Arc::new(EchoTool::new(&spec.name))));
        assert!(table.alias("legacy.EchoTool", "echo"));
        assert!(!table.alias("other", "missing"));

        let ctor = table.get("legacy.EchoTool").unwrap();
        let tool = ctor(&ToolSpec::new("e1", "legacy.EchoTool", Value::Null)).unwrap();
        assert_eq!(tool.name(), "e1");
        assert_eq!(table.tags(), vec!["echo", "legacy.EchoTool"]);
    }

    #[test]
    fn builtin_table_knows_every_variant() {
        let table = FactoryTable::builtin();
        for tag in [
            "file_reader",
            "directory_list",
            "terminal_command",
            "safe_terminal",
            "oracle_query",
            "rally_api",
            "remote_mcp",
            "semantic_search",
            "tools.file_tools.FileReaderTool",
            "tools.terminal_tools.SafeTerminalTool",
        ] {
            assert!(table.contains(tag), "missing {tag}");
        }
    }
}
