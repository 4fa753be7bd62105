//! Template-only terminal executor with strict argument validation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{as_text, object_param, str_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};
use crate::tools::command::{
    contains_dangerous_chars, ensure_directory, is_working_dir_allowed, replace_placeholders,
    run_shell, template_placeholders, ShellRun,
};
use crate::tools::terminal::{template_params_property, working_dir_property};

#[derive(Debug, Clone, Deserialize)]
struct SafeTerminalConfig {
    #[serde(default)]
    command_templates: BTreeMap<String, String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(
        default = "default_timeout",
        deserialize_with = "agentyard_core::de::u64_lenient"
    )]
    max_execution_time: u64,
    #[serde(default = "default_working_dirs")]
    allowed_working_dirs: Vec<String>,
    #[serde(
        default = "default_output_size",
        deserialize_with = "agentyard_core::de::usize_lenient"
    )]
    max_output_size: usize,
    #[serde(default)]
    working_dir: Option<String>,
}

fn default_timeout() -> u64 {
    10
}

fn default_working_dirs() -> Vec<String> {
    vec![".".to_string()]
}

fn default_output_size() -> usize {
    5_000
}

/// Every placeholder must be supplied and free of shell metacharacters.
fn fill_template(template: &str, values: &Map<String, Value>) -> Result<String, ToolError> {
    for name in template_placeholders(template) {
        let value = values
            .get(&name)
            .ok_or_else(|| ToolError::InvalidInput(format!("missing required parameter: {name}")))?;
        if contains_dangerous_chars(&as_text(value)) {
            return Err(ToolError::PermissionDenied(format!(
                "parameter '{name}' contains potentially dangerous characters"
            )));
        }
    }
    Ok(replace_placeholders(template, values))
}

/// Run only configured command templates.
pub struct SafeTerminalTool {
    meta: ToolMeta,
    config: SafeTerminalConfig,
}

impl SafeTerminalTool {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        let config: SafeTerminalConfig = spec.typed_config()?;
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
}

#[async_trait]
impl Tool for SafeTerminalTool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        let mut schema = serde_json::json!({
            "type": "object",
            "properties": {
                "template_params": template_params_property(
                    "Parameters to substitute in the command template"
                )
            }
        });
        if self.config.command.is_none() {
            schema["properties"]["template_name"] = serde_json::json!({
                "type": "string",
                "description": "Name of predefined command template to use"
            });
            schema["required"] = serde_json::json!(["template_name"]);
        }
        if self.config.working_dir.is_none() {
            schema["properties"]["working_dir"] = working_dir_property();
        }
        schema
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let template_params = object_param(&params, "template_params")?;
        let template_name = str_param(&params, "template_name");

        let command = match (&self.config.command, template_name) {
            (Some(fixed), _) => fill_template(fixed, &template_params)?,
            (None, Some(name)) => {
                let template = self.config.command_templates.get(name).ok_or_else(|| {
                    let available: Vec<&str> =
                        self.config.command_templates.keys().map(String::as_str).collect();
                    ToolError::InvalidInput(format!(
                        "unknown command template: {name} (available: {})",
                        available.join(", ")
                    ))
                })?;
                fill_template(template, &template_params)?
            }
            (None, None) => {
                return Err(ToolError::InvalidInput(
                    "either a fixed command must be configured or template_name must be provided"
                        .to_string(),
                ))
            }
        };

        let working_dir = self
            .config
            .working_dir
            .as_deref()
            .or_else(|| str_param(&params, "working_dir"))
            .unwrap_or(".");
        if !is_working_dir_allowed(working_dir, &self.config.allowed_working_dirs) {
            return Err(ToolError::PermissionDenied(format!(
                "working directory not allowed: {working_dir}"
            )));
        }
        ensure_directory(working_dir).await?;

        let mut outcome = run_shell(ShellRun {
            command: &command,
            working_dir,
            timeout: Duration::from_secs(self.config.max_execution_time),
            capture_output: true,
            max_output_size: self.config.max_output_size,
        })
        .await?;

        if let Some(Value::Object(report)) = outcome.result.as_mut() {
            match &self.config.command {
                Some(fixed) => report.insert("fixed_command".into(), fixed.clone().into()),
                None => report.insert("template_name".into(), template_name.into()),
            };
            report.insert("template_params".into(), Value::Object(template_params));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(config: &str) -> SafeTerminalTool {
        let spec = ToolSpec::new("safe", "safe_terminal", serde_yaml::from_str(config).unwrap());
        SafeTerminalTool::from_spec(&spec).unwrap()
    }

    #[tokio::test]
    async fn runs_template_with_clean_params() {
        let safe = tool("command_templates:\n  show: echo {word}\n");
        let outcome = safe
            .execute(serde_json::json!({"template_name": "show", "template_params": {"word": "ok"}}))
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        let report = outcome.result.unwrap();
        assert_eq!(report["stdout"], "ok\n");
        assert_eq!(report["template_name"], "show");
        assert_eq!(report["template_params"]["word"], "ok");
    }

    #[tokio::test]
    async fn rejects_injection_characters() {
        let safe = tool("command_templates:\n  show: echo {word}\n");
        for bad in ["a;b", "$(id)", "x|y", "`id`", "a\nb"] {
            let outcome = safe
                .execute(serde_json::json!({"template_name": "show", "template_params": {"word": bad}}))
                .await;
            assert!(!outcome.success, "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn every_placeholder_is_required() {
        let safe = tool("command: echo {a} {b}");
        let outcome = safe
            .execute(serde_json::json!({"template_params": {"a": "1"}}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("missing required parameter: b"));
    }

    #[tokio::test]
    async fn direct_commands_are_not_accepted() {
        let outcome = tool("command_templates: {}")
            .execute(serde_json::json!({"command": "echo hi"}))
            .await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn empty_working_dir_list_denies() {
        let outcome = tool("command: 'true'\nallowed_working_dirs: []")
            .execute(serde_json::json!({}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("working directory not allowed"));
    }

    #[tokio::test]
    async fn default_allows_current_directory_only() {
        let safe = tool("command: 'true'");
        assert!(safe.execute(serde_json::json!({})).await.success);
        let outside = safe.execute(serde_json::json!({"working_dir": "/"})).await;
        assert!(!outside.success);
    }

    #[tokio::test]
    async fn unknown_template_lists_available() {
        let outcome = tool("command_templates:\n  a: 'true'\n  b: 'true'\n")
            .execute(serde_json::json!({"template_name": "c"}))
            .await;
        assert!(outcome.error.unwrap().contains("available: a, b"));
    }

    #[test]
    fn schema_requires_template_name_without_fixed_command() {
        let schema = tool("{}").schema();
        assert_eq!(schema["required"], serde_json::json!(["template_name"]));
        let fixed = tool("command: ls").schema();
        assert!(fixed.get("required").is_none());
    }
}
