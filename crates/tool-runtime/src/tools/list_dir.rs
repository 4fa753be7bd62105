//! Directory listing with item limit and name filters.

use std::path::PathBuf;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{str_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};
use crate::tools::{confine, normalize_extensions};

#[derive(Debug, Clone, Deserialize)]
struct DirectoryListConfig {
    #[serde(
        default = "default_max_items",
        deserialize_with = "agentyard_core::de::usize_lenient"
    )]
    max_items: usize,
    #[serde(default = "default_root")]
    root_path: PathBuf,
    #[serde(default)]
    allowed_extensions: Option<Vec<String>>,
    #[serde(default)]
    excluded_patterns: Vec<String>,
    #[serde(default, deserialize_with = "agentyard_core::de::bool_lenient")]
    show_hidden: bool,
}

fn default_max_items() -> usize {
    100
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterType {
    All,
    Files,
    Directories,
}

impl FilterType {
    fn parse(s: &str) -> Result<Self, ToolError> {
        match s {
            "all" => Ok(Self::All),
            "files" => Ok(Self::Files),
            "directories" => Ok(Self::Directories),
            other => Err(ToolError::InvalidInput(format!(
                "filter_type must be one of all, files, directories; got '{other}'"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Files => "files",
            Self::Directories => "directories",
        }
    }
}

/// List files and folders beneath a configured root.
pub struct DirectoryListTool {
    meta: ToolMeta,
    max_items: usize,
    root_path: PathBuf,
    allowed_extensions: Option<Vec<String>>,
    excluded_patterns: Vec<Pattern>,
    excluded_raw: Vec<String>,
    show_hidden: bool,
}

impl DirectoryListTool {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        let config: DirectoryListConfig = spec.typed_config()?;
        let excluded_patterns = config
            .excluded_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    ToolError::InvalidConfig(format!("invalid excluded pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            max_items: config.max_items,
            root_path: config.root_path,
            allowed_extensions: config
                .allowed_extensions
                .as_deref()
                .map(normalize_extensions),
            excluded_patterns,
            excluded_raw: config.excluded_patterns,
            show_hidden: config.show_hidden,
        })
    }

    fn include(
        &self,
        name: &str,
        is_dir: bool,
        is_file: bool,
        filter: FilterType,
        name_pattern: Option<&Pattern>,
    ) -> bool {
        if !self.show_hidden && name.starts_with('.') {
            return false;
        }
        if self.excluded_patterns.iter().any(|p| p.matches(name)) {
            return false;
        }
        if let Some(pattern) = name_pattern {
            let opts = MatchOptions {
                case_sensitive: false,
                ..MatchOptions::new()
            };
            if !pattern.matches_with(name, opts) {
                return false;
            }
        }
        if is_file {
            if let Some(allowed) = &self.allowed_extensions {
                let ext = std::path::Path::new(name)
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                    .unwrap_or_default();
                if !allowed.contains(&ext) {
                    return false;
                }
            }
        }
        match filter {
            FilterType::All => true,
            FilterType::Files => is_file,
            FilterType::Directories => is_dir,
        }
    }
}

#[async_trait]
impl Tool for DirectoryListTool {
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
                    "description": "Path to the directory to list (optional, uses configured root_path if not provided)"
                },
                "filter_type": {
                    "type": "string",
                    "description": "Filter by item type: 'all', 'files', or 'directories'",
                    "enum": ["all", "files", "directories"],
                    "default": "all"
                },
                "name_pattern": {
                    "type": "string",
                    "description": "Pattern to match file/folder names (supports wildcards like *.txt)"
                }
            },
            "required": []
        })
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let filter = FilterType::parse(str_param(&params, "filter_type").unwrap_or("all"))?;
        let raw_pattern = str_param(&params, "name_pattern").filter(|p| !p.is_empty());
        let name_pattern = raw_pattern
            .map(|p| {
                Pattern::new(&p.to_lowercase())
                    .map_err(|e| ToolError::InvalidInput(format!("invalid name_pattern: {e}")))
            })
            .transpose()?;

        let dir = confine(&self.root_path, str_param(&params, "path").unwrap_or(".")).await?;
        if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Err(ToolError::InvalidInput(format!(
                "path is not a directory: {}",
                dir.display()
            )));
        }
        debug!(tool = %self.meta.name, dir = %dir.display(), "listing directory");

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut items = Vec::new();
        let mut scanned = 0usize;
        let mut truncated = false;

        while let Some(entry) = entries.next_entry().await? {
            scanned += 1;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks, so a link to a directory lists as a directory.
            let meta = tokio::fs::metadata(entry.path()).await.ok();
            let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());
            let is_file = meta.as_ref().is_some_and(|m| m.is_file());

            if !self.include(&name, is_dir, is_file, filter, name_pattern.as_ref()) {
                continue;
            }
            items.push((name, entry.path(), is_dir, is_file, meta));
        }

        items.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase()))
        });
        if items.len() > self.max_items {
            items.truncate(self.max_items);
            truncated = true;
        }

        let listed: Vec<Value> = items
            .into_iter()
            .map(|(name, path, is_dir, is_file, meta)| {
                let mut item = serde_json::json!({
                    "name": name,
                    "path": path.display().to_string(),
                    "is_directory": is_dir,
                    "is_file": is_file,
                });
                if is_file {
                    item["size_bytes"] = meta.map(|m| m.len()).into();
                    item["extension"] = std::path::Path::new(&name)
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                        .unwrap_or_default()
                        .into();
                }
                item
            })
            .collect();

        Ok(ToolOutcome::success(serde_json::json!({
            "directory_path": dir.display().to_string(),
            "total_items_scanned": scanned,
            "total_items_found": listed.len(),
            "max_items_limit": self.max_items,
            "truncated": truncated,
            "filter_applied": {
                "filter_type": filter.as_str(),
                "name_pattern": raw_pattern,
                "allowed_extensions": self.allowed_extensions,
                "excluded_patterns": self.excluded_raw,
                "show_hidden": self.show_hidden,
            },
            "items": listed,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(root: &std::path::Path, extra: &str) -> DirectoryListTool {
        let yaml = format!("root_path: {}\n{extra}", root.display());
        let spec = ToolSpec::new("lister", "directory_list", serde_yaml::from_str(&yaml).unwrap());
        DirectoryListTool::from_spec(&spec).unwrap()
    }

    fn names(outcome: &ToolOutcome) -> Vec<String> {
        outcome.result.as_ref().unwrap()["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap().to_string())
            .collect()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::create_dir(dir.path().join("Docs")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("A.md"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "h").unwrap();
        std::fs::write(dir.path().join("build.log"), "l").unwrap();
        dir
    }

    #[tokio::test]
    async fn directories_first_then_alphabetical() {
        let dir = fixture();
        let outcome = tool(dir.path(), "").execute(serde_json::json!({})).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(names(&outcome), vec!["Docs", "src", "A.md", "b.txt", "build.log"]);
        assert_eq!(outcome.result.unwrap()["total_items_scanned"], 6);
    }

    #[tokio::test]
    async fn filters_apply() {
        let dir = fixture();
        let lister = tool(
            dir.path(),
            "show_hidden: true\nexcluded_patterns: ['*.log']\nallowed_extensions: [txt, '.md']\n",
        );

        let files = lister
            .execute(serde_json::json!({"filter_type": "files"}))
            .await;
        assert_eq!(names(&files), vec!["A.md", "b.txt"]);

        let dirs = lister
            .execute(serde_json::json!({"filter_type": "directories"}))
            .await;
        assert_eq!(names(&dirs), vec!["Docs", "src"]);

        let pattern = lister
            .execute(serde_json::json!({"name_pattern": "*.MD"}))
            .await;
        assert_eq!(names(&pattern), vec!["A.md"]);
    }

    #[tokio::test]
    async fn truncates_after_sorting() {
        let dir = fixture();
        let outcome = tool(dir.path(), "max_items: 2")
            .execute(serde_json::json!({}))
            .await;
        assert_eq!(names(&outcome), vec!["Docs", "src"]);
        assert_eq!(outcome.result.unwrap()["truncated"], true);
    }

    #[tokio::test]
    async fn subdirectory_and_escape() {
        let dir = fixture();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        let lister = tool(dir.path(), "");

        let sub = lister.execute(serde_json::json!({"path": "src"})).await;
        assert_eq!(names(&sub), vec!["lib.rs"]);

        let escaped = lister.execute(serde_json::json!({"path": ".."})).await;
        assert!(!escaped.success);
    }

    #[tokio::test]
    async fn unknown_filter_type_fails() {
        let dir = fixture();
        let outcome = tool(dir.path(), "")
            .execute(serde_json::json!({"filter_type": "links"}))
            .await;
        assert!(!outcome.success);
    }
}
