//! Text file reader restricted by extension, size and an optional root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{str_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};
use crate::tools::{confine, normalize_extensions};

#[derive(Debug, Clone, Deserialize)]
struct FileReaderConfig {
    #[serde(default = "default_extensions")]
    allowed_extensions: Vec<String>,
    #[serde(
        default = "default_max_size_mb",
        deserialize_with = "agentyard_core::de::f64_lenient"
    )]
    max_size_mb: f64,
    #[serde(default)]
    root_path: Option<PathBuf>,
}

fn default_extensions() -> Vec<String> {
    vec![".txt".to_string(), ".md".to_string()]
}

fn default_max_size_mb() -> f64 {
    2.0
}

/// Read a text file and return its content with size and encoding.
pub struct FileReaderTool {
    meta: ToolMeta,
    allowed_extensions: Vec<String>,
    max_size_bytes: u64,
    root_path: Option<PathBuf>,
}

impl FileReaderTool {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        let config: FileReaderConfig = spec.typed_config()?;
        if !(config.max_size_mb > 0.0) {
            return Err(ToolError::InvalidConfig(format!(
                "max_size_mb must be positive, got {}",
                config.max_size_mb
            )));
        }
        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            allowed_extensions: normalize_extensions(&config.allowed_extensions),
            max_size_bytes: (config.max_size_mb * 1024.0 * 1024.0) as u64,
            root_path: config.root_path,
        })
    }

    async fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        match &self.root_path {
            Some(root) => confine(root, requested).await,
            None => {
                let path = Path::new(requested);
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(ToolError::NotFound(format!("file not found: {requested}")));
                }
                Ok(path.to_path_buf())
            }
        }
    }

    fn extension_allowed(&self, path: &Path) -> Result<(), ToolError> {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if self.allowed_extensions.iter().any(|a| *a == ext) {
            Ok(())
        } else {
            Err(ToolError::PermissionDenied(format!(
                "file extension not allowed: '{ext}'. Allowed extensions: {}",
                self.allowed_extensions.join(", ")
            )))
        }
    }
}

fn decode(bytes: Vec<u8>, encoding: &str) -> Result<String, ToolError> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8(bytes)
            .map_err(|e| ToolError::ExecutionFailed(format!("file is not valid utf-8: {e}"))),
        "latin-1" | "latin1" | "iso-8859-1" => Ok(bytes.into_iter().map(char::from).collect()),
        other => Err(ToolError::InvalidInput(format!(
            "unsupported encoding '{other}' (use utf-8 or latin-1)"
        ))),
    }
}

#[async_trait]
impl Tool for FileReaderTool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding",
                    "default": "utf-8"
                }
            },
            "required": ["path"]
        })
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let requested = str_param(&params, "path")
            .or_else(|| str_param(&params, "file_path"))
            .ok_or_else(|| ToolError::InvalidInput("missing 'path' field".to_string()))?;
        let encoding = str_param(&params, "encoding").unwrap_or("utf-8");

        let path = self.resolve(requested).await?;
        self.extension_allowed(&path)?;

        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(ToolError::InvalidInput(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if meta.len() > self.max_size_bytes {
            return Err(ToolError::PermissionDenied(format!(
                "file too large: {:.2}MB > {:.2}MB",
                meta.len() as f64 / (1024.0 * 1024.0),
                self.max_size_bytes as f64 / (1024.0 * 1024.0)
            )));
        }

        debug!(tool = %self.meta.name, path = %path.display(), bytes = meta.len(), "reading file");
        let content = decode(tokio::fs::read(&path).await?, encoding)?;

        Ok(ToolOutcome::success(serde_json::json!({
            "file_path": path.display().to_string(),
            "size_bytes": meta.len(),
            "encoding": encoding,
            "content": content,
        })))
    }
}
