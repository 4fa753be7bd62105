use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::params::{self, ParamSpec};

/// Result of a tool invocation, in the shape agent runtimes dispatch on:
/// `{success, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// A failure always carries a non-empty error description.
    pub fn failure(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// A failure that also returns partial output (e.g. stderr of a failed command).
    pub fn failure_with(error: impl Into<String>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::failure(error)
        }
    }
}

/// What an agent runtime receives for a tool: a callable function or a
/// remote toolset connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolBinding {
    Function(FunctionDeclaration),
    Toolset(ToolsetConnection),
}

/// Function declaration handed to the agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    /// Tool description followed by an `Args:` section, when params are declared.
    pub description: String,
    /// JSON Schema for the call arguments.
    pub parameters: Value,
}

/// Connection parameters for a remote toolset the runtime attaches itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsetConnection {
    pub name: String,
    pub url: String,
    pub headers: std::collections::BTreeMap<String, String>,
    /// Empty means every tool the server offers.
    pub tool_filter: Vec<String>,
}

/// The extension point every configured tool implements.
///
/// Instances hold only read-only configuration after construction, so
/// concurrent `execute` calls on one instance need no locking.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key (the tool's name in config).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing accepted invocation parameters.
    fn schema(&self) -> Value;

    /// Parameters declared in config under `params`, if any.
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    /// Build the object handed to the agent runtime.
    fn create_instance(&self) -> ToolBinding {
        let parameters = if self.params().is_empty() {
            self.schema()
        } else {
            params::schema_for(self.params())
        };
        ToolBinding::Function(FunctionDeclaration {
            name: self.name().to_string(),
            description: params::describe(self.description(), self.params()),
            parameters,
        })
    }

    /// Perform the tool's action.
    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError>;

    /// Run [`Tool::invoke`], folding errors and panics into a failed outcome.
    async fn execute(&self, params: Value) -> ToolOutcome {
        let name = self.name().to_string();
        debug!(tool = %name, "executing tool");
        match AssertUnwindSafe(self.invoke(params)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                ToolOutcome::failure(e.to_string())
            }
            Err(_) => {
                error!(tool = %name, "tool panicked during execution");
                ToolOutcome::failure(format!("tool '{name}' panicked during execution"))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Simple echo tool for testing purposes.
#[cfg(any(test, feature = "test-utils"))]
pub struct EchoTool {
    pub name: String,
}

#[cfg(any(test, feature = "test-utils"))]
impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes back the input message. For testing."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"]
        })
    }

    async fn invoke(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;
        if message == "panic" {
            panic!("echo asked to panic");
        }
        Ok(ToolOutcome::success(Value::String(message.to_string())))
    }
}
