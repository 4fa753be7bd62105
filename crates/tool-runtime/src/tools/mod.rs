//! Built-in tool variants and the helpers they share.
//!
//! Each variant registers under a short tag and under the dotted class path
//! older configuration files use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::factory::FactoryTable;
use crate::tool::{Tool, ToolError};

pub(crate) mod command;
pub mod file_read;
pub mod list_dir;
pub mod oracle;
pub mod rally;
pub mod remote_mcp;
pub mod safe_terminal;
pub mod semantic_search;
pub mod terminal;

pub use file_read::FileReaderTool;
pub use list_dir::DirectoryListTool;
pub use oracle::{
    factory_with_backend, OracleQueryTool, QueryBackend, QueryRequest, QueryResult,
    UnavailableBackend,
};
pub use rally::RallyAPITool;
pub use remote_mcp::RemoteMcpTools;
pub use safe_terminal::SafeTerminalTool;
pub use semantic_search::{
    factory_with_embedder, EmbeddingProvider, SemanticSearchTool, UnavailableEmbedder,
};
pub use terminal::TerminalCommandTool;

/// (tag, legacy class path) for every built-in variant.
pub const BUILTIN_CLASSES: &[(&str, &str)] = &[
    ("file_reader", "tools.file_tools.FileReaderTool"),
    ("directory_list", "tools.file_tools.DirectoryListTool"),
    ("terminal_command", "tools.terminal_tools.TerminalCommandTool"),
    ("safe_terminal", "tools.terminal_tools.SafeTerminalTool"),
    ("oracle_query", "tools.oracle_tools.OracleQueryTool"),
    ("rally_api", "tools.rally_tools.RallyAPITool"),
    ("remote_mcp", "core.tool_creation.generic_tools.RemoteMCPTools"),
    ("semantic_search", "tools.semantic_search.SemanticSearchTool"),
];

fn shared<T: Tool + 'static>(tool: T) -> Arc<dyn Tool> {
    Arc::new(tool)
}

pub(crate) fn register_builtin(table: &mut FactoryTable) {
    table.register("file_reader", |spec| FileReaderTool::from_spec(spec).map(shared));
    table.register("directory_list", |spec| {
        DirectoryListTool::from_spec(spec).map(shared)
    });
    table.register("terminal_command", |spec| {
        TerminalCommandTool::from_spec(spec).map(shared)
    });
    table.register("safe_terminal", |spec| SafeTerminalTool::from_spec(spec).map(shared));
    table.register(
        "oracle_query",
        factory_with_backend(Arc::new(UnavailableBackend)),
    );
    table.register("rally_api", |spec| RallyAPITool::from_spec(spec).map(shared));
    table.register("remote_mcp", |spec| RemoteMcpTools::from_spec(spec).map(shared));
    table.register(
        "semantic_search",
        factory_with_embedder(Arc::new(UnavailableEmbedder)),
    );

    for (tag, class_path) in BUILTIN_CLASSES {
        table.alias(class_path, tag);
    }
}

/// Lowercase and dot-prefix configured extensions (`"TXT"` → `".txt"`).
pub(crate) fn normalize_extensions(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
        .collect()
}

/// Resolve `requested` against `root` and require the result to stay inside it.
///
/// Both sides are canonicalized, so `..` segments and symlinks cannot escape.
pub(crate) async fn confine(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let root = tokio::fs::canonicalize(root).await.map_err(|e| {
        ToolError::InvalidConfig(format!("root path '{}' is not accessible: {e}", root.display()))
    })?;
    let candidate = root.join(requested);
    let resolved = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| ToolError::NotFound(format!("path not found: {requested}")))?;
    if !resolved.starts_with(&root) {
        return Err(ToolError::PermissionDenied(format!(
            "path '{requested}' is outside the allowed root"
        )));
    }
    Ok(resolved)
}
