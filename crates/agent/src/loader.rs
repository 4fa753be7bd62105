//! Builds immutable agent trees from [`AgentSpec`]s, binding every tool
//! reference to a live instance from the [`ToolRegistry`].

use std::path::Path;
use std::sync::Arc;

use agentyard_core::{ConfigError, ConfigValue, EnvResolutionError};
use agentyard_tool_runtime::{RegistryError, Tool, ToolBinding, ToolRegistry};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::schema::AgentSpec;

/// Model used when an agent definition does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid agent configuration at '{path}': {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("agent '{agent}' references unknown tool '{tool}'")]
    ToolResolution { agent: String, tool: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<EnvResolutionError> for AgentError {
    fn from(e: EnvResolutionError) -> Self {
        Self::Config(ConfigError::Env(e))
    }
}

/// A tool bound into an agent: the shared instance plus what the agent
/// runtime is handed for it.
#[derive(Clone)]
pub struct BoundTool {
    name: String,
    tool: Arc<dyn Tool>,
    binding: ToolBinding,
}

impl BoundTool {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub fn binding(&self) -> &ToolBinding {
        &self.binding
    }
}

impl std::fmt::Debug for BoundTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundTool")
            .field("name", &self.name)
            .field("binding", &self.binding)
            .finish()
    }
}

/// A fully built agent. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct AgentNode {
    name: String,
    model: String,
    description: String,
    instruction: String,
    tools: Vec<BoundTool>,
    sub_agents: Vec<AgentNode>,
}

impl AgentNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn tools(&self) -> &[BoundTool] {
        &self.tools
    }

    pub fn sub_agents(&self) -> &[AgentNode] {
        &self.sub_agents
    }

    /// Depth-first search for an agent by name, starting with `self`.
    pub fn find(&self, name: &str) -> Option<&AgentNode> {
        if self.name == name {
            return Some(self);
        }
        self.sub_agents.iter().find_map(|a| a.find(name))
    }

    /// Number of agents in this tree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.sub_agents.iter().map(AgentNode::count).sum::<usize>()
    }

    /// JSON description of the tree for an external agent runtime.
    pub fn manifest(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "model": self.model,
            "description": self.description,
            "instruction": self.instruction,
            "tools": self.tools.iter().map(|t| &t.binding).collect::<Vec<_>>(),
            "sub_agents": self.sub_agents.iter().map(AgentNode::manifest).collect::<Vec<_>>(),
        })
    }
}

/// Build an agent tree, resolving every tool name against `registry`.
pub fn build_agent(spec: &AgentSpec, registry: &ToolRegistry) -> Result<AgentNode, AgentError> {
    build_at(spec, registry, "root_agent")
}

fn required<'a>(value: &'a Option<String>, key: &str, path: &str) -> Result<&'a str, AgentError> {
    value.as_deref().ok_or_else(|| AgentError::InvalidConfig {
        path: path.to_string(),
        reason: format!("missing required key '{key}'"),
    })
}

fn build_at(spec: &AgentSpec, registry: &ToolRegistry, path: &str) -> Result<AgentNode, AgentError> {
    let name = required(&spec.name, "name", path)?;
    let description = required(&spec.description, "description", path)?;
    let instruction = required(&spec.instruction, "instruction", path)?;

    let model = match &spec.model {
        Some(model) => model.clone(),
        None => {
            warn!(agent = %name, default = DEFAULT_MODEL, "agent has no model, using default");
            DEFAULT_MODEL.to_string()
        }
    };

    let tools = spec
        .tools
        .iter()
        .map(|tool_name| match registry.get_tool(tool_name) {
            Ok(tool) => Ok(BoundTool {
                name: tool_name.clone(),
                binding: tool.create_instance(),
                tool,
            }),
            Err(RegistryError::ToolNotFound(_)) => Err(AgentError::ToolResolution {
                agent: name.to_string(),
                tool: tool_name.clone(),
            }),
            Err(e) => Err(AgentError::InvalidConfig {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let sub_agents = spec
        .sub_agents
        .iter()
        .map(|(key, sub)| build_at(sub, registry, &format!("{path}.sub_agents.{key}")))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(agent = %name, tools = tools.len(), sub_agents = sub_agents.len(), "agent built");

    Ok(AgentNode {
        name: name.to_string(),
        model,
        description: description.to_string(),
        instruction: instruction.to_string(),
        tools,
        sub_agents,
    })
}

/// Build the `root_agent` section of a config document.
///
/// Placeholders inside the section are resolved; the rest of the document
/// is left alone.
pub fn root_agent_from_value(doc: &ConfigValue, registry: &ToolRegistry) -> Result<AgentNode, AgentError> {
    let raw = match doc.get("root_agent") {
        None | Some(ConfigValue::Null) => {
            return Err(AgentError::InvalidConfig {
                path: "root_agent".to_string(),
                reason: "section is missing".to_string(),
            })
        }
        Some(raw) => raw,
    };

    let resolved = agentyard_core::resolve(raw).map_err(|e| EnvResolutionError {
        path: Some(match e.path.as_deref() {
            Some(p) if !p.is_empty() => format!("root_agent.{p}"),
            _ => "root_agent".to_string(),
        }),
        name: e.name,
    })?;

    let spec: AgentSpec = serde_yaml::from_value(resolved).map_err(|e| AgentError::InvalidConfig {
        path: "root_agent".to_string(),
        reason: e.to_string(),
    })?;
    build_agent(&spec, registry)
}

/// Read a config file and build its `root_agent` tree.
pub fn load_root_agent(path: impl AsRef<Path>, registry: &ToolRegistry) -> Result<AgentNode, AgentError> {
    let path = path.as_ref();
    let doc = agentyard_core::read_yaml(path)?;
    let agent = root_agent_from_value(&doc, registry)?;
    info!(path = %path.display(), root = %agent.name(), agents = agent.count(), "root agent loaded");
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentyard_tool_runtime::tool::EchoTool;
    use agentyard_tool_runtime::FactoryTable;

    fn registry() -> ToolRegistry {
        let mut table = FactoryTable::new();
        table.register("echo", |spec| Ok(Arc::new(EchoTool::new(&spec.name))));
        let registry = ToolRegistry::new(table);
        registry
            .load_from_str("tools:\n  search: {class: echo}\n  notes: {class: echo}\n")
            .unwrap();
        registry
    }

    fn spec(yaml: &str) -> AgentSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn builds_tree_with_bound_tools() {
        let agent = build_agent(
            &spec(
                r#"
name: root
model: gemini-2.5-pro
description: Root
instruction: Coordinate.
tools: [search]
sub_agents:
  writer:
    name: writer
    description: Writes
    instruction: Write.
    tools: [notes, search]
"#,
            ),
            &registry(),
        )
        .unwrap();

        assert_eq!(agent.model(), "gemini-2.5-pro");
        assert_eq!(agent.tools()[0].name(), "search");
        let writer = agent.find("writer").unwrap();
        assert_eq!(writer.tools().len(), 2);
        assert_eq!(writer.model(), DEFAULT_MODEL);
        assert_eq!(agent.count(), 2);
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = build_agent(
            &spec("name: a\ndescription: d\ninstruction: i\ntools: [search, nope]\n"),
            &registry(),
        )
        .unwrap_err();
        match err {
            AgentError::ToolResolution { agent, tool } => {
                assert_eq!(agent, "a");
                assert_eq!(tool, "nope");
            }
            other => panic!("expected ToolResolution, got: {other:?}"),
        }
    }

    #[test]
    fn missing_key_reports_path() {
        let err = build_agent(
            &spec(
                "name: a\ndescription: d\ninstruction: i\nsub_agents:\n  helper: {name: h, description: d}\n",
            ),
            &registry(),
        )
        .unwrap_err();
        match err {
            AgentError::InvalidConfig { path, reason } => {
                assert_eq!(path, "root_agent.sub_agents.helper");
                assert!(reason.contains("instruction"));
            }
            other => panic!("expected InvalidConfig, got: {other:?}"),
        }
    }

    #[test]
    fn manifest_lists_bindings_and_children() {
        let agent = build_agent(
            &spec(
                "name: a\ndescription: d\ninstruction: i\ntools: [search]\nsub_agents:\n  b: {name: b, description: d, instruction: i}\n",
            ),
            &registry(),
        )
        .unwrap();
        let manifest = agent.manifest();
        assert_eq!(manifest["model"], DEFAULT_MODEL);
        assert_eq!(manifest["tools"][0]["kind"], "function");
        assert_eq!(manifest["tools"][0]["name"], "search");
        assert_eq!(manifest["sub_agents"][0]["name"], "b");
    }

    #[test]
    fn root_section_is_required() {
        let doc = agentyard_core::parse_yaml("tools: {}\n").unwrap();
        assert!(matches!(
            root_agent_from_value(&doc, &registry()),
            Err(AgentError::InvalidConfig { .. })
        ));
    }
}
