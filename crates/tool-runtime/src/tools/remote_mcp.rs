//! Remote MCP toolset over streamable HTTP.
//!
//! Nothing is called from here: the agent runtime connects to the server
//! using the [`ToolsetConnection`] this tool describes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::factory::{ToolMeta, ToolSpec};
use crate::tool::{Tool, ToolBinding, ToolError, ToolOutcome, ToolsetConnection};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoteMcpConfig {
    url: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    tools_filter: Vec<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Read through [`ToolMeta`].
    #[serde(default, rename = "params")]
    _params: Option<serde_yaml::Value>,
}

/// Connection to a remote MCP server exposing a set of tools.
pub struct RemoteMcpTools {
    meta: ToolMeta,
    connection: ToolsetConnection,
}

impl RemoteMcpTools {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        let config: RemoteMcpConfig = spec.typed_config()?;
        let url = url::Url::parse(&config.url)
            .map_err(|e| ToolError::InvalidConfig(format!("invalid url '{}': {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidConfig(format!(
                "url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        let mut headers = BTreeMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", config.api_key),
        );
        // Configured headers may override the generated Authorization.
        headers.extend(config.headers);

        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            connection: ToolsetConnection {
                name: spec.name.clone(),
                url: url.to_string(),
                headers,
                tool_filter: config.tools_filter,
            },
        })
    }

    pub fn connection(&self) -> &ToolsetConnection {
        &self.connection
    }
}

#[async_trait]
impl Tool for RemoteMcpTools {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    fn create_instance(&self) -> ToolBinding {
        ToolBinding::Toolset(self.connection.clone())
    }

    async fn invoke(&self, _params: Value) -> Result<ToolOutcome, ToolError> {
        Err(ToolError::Unavailable(format!(
            "'{}' is a remote toolset; its tools are dispatched by the agent runtime",
            self.meta.name
        )))
    }
}
