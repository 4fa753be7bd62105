//! General terminal executor: a fixed command, named templates, or direct
//! commands filtered by an allow-list.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{object_param, str_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};
use crate::tools::command::{
    ensure_directory, is_command_allowed, is_working_dir_allowed, replace_placeholders, run_shell,
    ShellRun,
};

#[derive(Debug, Clone, Deserialize)]
struct TerminalConfig {
    #[serde(default)]
    allowed_commands: Vec<String>,
    #[serde(default)]
    command_templates: BTreeMap<String, String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(
        default = "default_timeout",
        deserialize_with = "agentyard_core::de::u64_lenient"
    )]
    max_execution_time: u64,
    #[serde(default)]
    allowed_working_dirs: Vec<String>,
    #[serde(
        default = "default_true",
        deserialize_with = "agentyard_core::de::bool_lenient"
    )]
    capture_output: bool,
    #[serde(
        default = "default_output_size",
        deserialize_with = "agentyard_core::de::usize_lenient"
    )]
    max_output_size: usize,
    #[serde(default)]
    working_dir: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_output_size() -> usize {
    10_000
}

pub(crate) fn working_dir_property() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "Working directory for command execution",
        "default": "."
    })
}

pub(crate) fn template_params_property(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "description": description,
        "additionalProperties": true
    })
}

/// Run shell commands with allow-list, working-directory and timeout limits.
pub struct TerminalCommandTool {
    meta: ToolMeta,
    config: TerminalConfig,
}

impl TerminalCommandTool {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        let config: TerminalConfig = spec.typed_config()?;
        if config.max_execution_time == 0 {
            return Err(ToolError::InvalidConfig(
                "max_execution_time must be at least 1 second".to_string(),
            ));
        }
        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            config,
        })
    }

    fn select_command(&self, params: &Value) -> Result<String, ToolError> {
        let template_params = object_param(params, "template_params")?;

        if let Some(fixed) = &self.config.command {
            return Ok(replace_placeholders(fixed, &template_params));
        }
        if let Some(name) = str_param(params, "template_name") {
            let template = self.config.command_templates.get(name).ok_or_else(|| {
                ToolError::InvalidInput(format!("unknown command template: {name}"))
            })?;
            return Ok(replace_placeholders(template, &template_params));
        }
        if let Some(command) = str_param(params, "command") {
            if !is_command_allowed(command, &self.config.allowed_commands) {
                return Err(ToolError::PermissionDenied(format!(
                    "command not allowed: {command}"
                )));
            }
            return Ok(command.to_string());
        }
        Err(ToolError::InvalidInput(
            "either 'command' or 'template_name' must be provided".to_string(),
        ))
    }
}

#[async_trait]
impl Tool for TerminalCommandTool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut schema = serde_json::json!({"type": "object", "required": []});

        if self.config.command.is_some() {
            properties.insert(
                "template_params".into(),
                template_params_property("Parameters to substitute in the fixed command template"),
            );
        } else {
            properties.insert(
                "command".into(),
                serde_json::json!({
                    "type": "string",
                    "description": "The terminal command to execute (if not using template)"
                }),
            );
            properties.insert(
                "template_name".into(),
                serde_json::json!({
                    "type": "string",
                    "description": "Name of predefined command template to use"
                }),
            );
            properties.insert(
                "template_params".into(),
                template_params_property("Parameters to substitute in the command template"),
            );
            schema["anyOf"] = serde_json::json!([
                {"required": ["command"]},
                {"required": ["template_name"]}
            ]);
        }
        if self.config.working_dir.is_none() {
            properties.insert("working_dir".into(), working_dir_property());
        }
        schema["properties"] = Value::Object(properties);
        schema
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let command = self.select_command(&params)?;
        let working_dir = self
            .config
            .working_dir
            .as_deref()
            .or_else(|| str_param(&params, "working_dir"))
            .unwrap_or(".");

        if !self.config.allowed_working_dirs.is_empty()
            && !is_working_dir_allowed(working_dir, &self.config.allowed_working_dirs)
        {
            return Err(ToolError::PermissionDenied(format!(
                "working directory not allowed: {working_dir}"
            )));
        }
        ensure_directory(working_dir).await?;

        run_shell(ShellRun {
            command: &command,
            working_dir,
            timeout: Duration::from_secs(self.config.max_execution_time),
            capture_output: self.config.capture_output,
            max_output_size: self.config.max_output_size,
        })
        .await
    }
}
