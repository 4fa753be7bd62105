//! YAML schema for agent definitions.
//!
//! ```yaml
//! root_agent:
//!   name: coordinator
//!   model: gemini-2.0-flash
//!   description: Routes requests to specialists
//!   instruction: Delegate to the right sub-agent.
//!   tools: [docs_reader]
//!   sub_agents:
//!     jira_helper:
//!       name: jira_helper
//!       description: Answers ticket questions
//!       instruction: Look up tickets.
//!       tools: [rally]
//! ```
//!
//! Required keys are kept optional here so the loader can report which one is
//! missing together with where it is missing.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// One agent definition, possibly with nested sub-agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    #[serde(default)]
    pub name: Option<String>,

    /// Model identifier; a default is applied when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// System instruction handed to the model.
    #[serde(default)]
    pub instruction: Option<String>,

    /// Names of registry tools, in order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tools: Vec<String>,

    /// Keyed sub-agents, built in declaration order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_agents: IndexMap<String, AgentSpec>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl AgentSpec {
    /// Number of agents in this tree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.sub_agents.values().map(AgentSpec::count).sum::<usize>()
    }
}
