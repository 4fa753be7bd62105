//! Read-only Oracle query tool.
//!
//! Statements are assembled and checked here; execution goes through a
//! [`QueryBackend`]. No driver ships with this crate, so the built-in
//! registration uses [`UnavailableBackend`] until an application registers
//! `oracle_query` again with [`factory_with_backend`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{object_param, str_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};
use crate::tools::command::template_placeholders;

/// Connection parameters; all three are required.
#[derive(Clone, Deserialize)]
pub struct ConnectionConfig {
    pub username: String,
    pub password: String,
    pub dsn: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("dsn", &self.dsn)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OracleConfig {
    #[serde(default)]
    connection: Option<Value>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    query_templates: BTreeMap<String, String>,
    #[serde(
        default = "default_max_rows",
        deserialize_with = "agentyard_core::de::usize_lenient"
    )]
    max_rows: usize,
    #[serde(
        default = "default_timeout",
        deserialize_with = "agentyard_core::de::u64_lenient"
    )]
    timeout: u64,
}

fn default_max_rows() -> usize {
    1000
}

fn default_timeout() -> u64 {
    30
}

/// A prepared statement ready for the backend.
#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
    pub sql: &'a str,
    pub binds: &'a Map<String, Value>,
    pub connection: &'a ConnectionConfig,
    pub max_rows: usize,
    pub timeout: Duration,
}

/// Rows fetched by a backend, at most `max_rows` of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// More rows were available beyond `max_rows`.
    pub has_more_rows: bool,
}

/// Executes prepared read-only statements against a database.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(&self, request: QueryRequest<'_>) -> Result<QueryResult, ToolError>;
}

/// Backend used when no driver has been wired in.
#[derive(Debug, Default)]
pub struct UnavailableBackend;

#[async_trait]
impl QueryBackend for UnavailableBackend {
    async fn query(&self, _request: QueryRequest<'_>) -> Result<QueryResult, ToolError> {
        Err(ToolError::Unavailable(
            "no Oracle driver is configured for oracle_query".to_string(),
        ))
    }
}

/// Turn `{name}` placeholders into `:name` bind variables.
///
/// Every placeholder must have a value; the returned map holds exactly the
/// referenced values.
pub fn prepare_query_with_binds(
    template: &str,
    values: &Map<String, Value>,
) -> Result<(String, Map<String, Value>), ToolError> {
    let mut sql = template.to_string();
    let mut binds = Map::new();
    for name in template_placeholders(template) {
        let value = values
            .get(&name)
            .ok_or_else(|| ToolError::InvalidInput(format!("missing required parameter: {name}")))?;
        sql = sql.replace(&format!("{{{name}}}"), &format!(":{name}"));
        binds.insert(name, value.clone());
    }
    Ok((sql, binds))
}

const DENIED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "MERGE",
];
const DENIED_PREFIXES: &[&str] = &["DBMS_", "UTL_", "SYS."];

/// Accept only a single SELECT that references no denied keyword or package.
///
/// One trailing `;` is tolerated; any other `;` means a second statement.
/// Matching is per identifier, so a column such as `UPDATED_AT` does not
/// trip the `UPDATE` rule.
pub fn is_query_safe(query: &str) -> bool {
    let upper = query.trim().to_uppercase();
    let body = upper.strip_suffix(';').unwrap_or(&upper);
    if !body.starts_with("SELECT") || body.contains(';') {
        return false;
    }
    body
        .split(|c: char| !(c.is_ascii_alphanumeric() || "_.$#".contains(c)))
        .filter(|t| !t.is_empty())
        .all(|token| {
            !DENIED_KEYWORDS.contains(&token)
                && !DENIED_PREFIXES.iter().any(|p| token.starts_with(p))
        })
}

/// Run read-only statements through a [`QueryBackend`].
pub struct OracleQueryTool {
    meta: ToolMeta,
    config: OracleConfig,
    connection: ConnectionConfig,
    backend: Arc<dyn QueryBackend>,
}

impl OracleQueryTool {
    pub fn from_spec(spec: &ToolSpec, backend: Arc<dyn QueryBackend>) -> Result<Self, ToolError> {
        let config: OracleConfig = spec.typed_config()?;
        let connection = parse_connection(config.connection.as_ref())?;
        if config.max_rows == 0 {
            return Err(ToolError::InvalidConfig("max_rows must be at least 1".to_string()));
        }
        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            config,
            connection,
            backend,
        })
    }

    fn prepare(&self, params: &Value) -> Result<(String, Map<String, Value>), ToolError> {
        // Values come from `query_params`, or from the top-level arguments when
        // the caller passes them flat.
        let mut values = object_param(params, "query_params")?;
        if values.is_empty() {
            if let Some(flat) = params.as_object() {
                values = flat.clone();
            }
        }

        if let Some(fixed) = &self.config.query {
            return prepare_query_with_binds(fixed, &values);
        }
        if let Some(name) = str_param(params, "template_name") {
            let template = self.config.query_templates.get(name).ok_or_else(|| {
                let available: Vec<&str> =
                    self.config.query_templates.keys().map(String::as_str).collect();
                ToolError::InvalidInput(format!(
                    "unknown query template: {name} (available: {})",
                    available.join(", ")
                ))
            })?;
            return prepare_query_with_binds(template, &values);
        }
        if let Some(query) = str_param(params, "query") {
            if !is_query_safe(query) {
                return Err(ToolError::PermissionDenied(format!(
                    "query contains potentially unsafe operations: {query}"
                )));
            }
            let statement = query.trim().trim_end_matches(';').trim_end();
            return Ok((statement.to_string(), Map::new()));
        }
        Err(ToolError::InvalidInput(
            "either 'query' or 'template_name' must be provided".to_string(),
        ))
    }
}

fn parse_connection(raw: Option<&Value>) -> Result<ConnectionConfig, ToolError> {
    let map = match raw {
        Some(Value::Object(map)) => map,
        _ => {
            return Err(ToolError::InvalidConfig(
                "missing 'connection' mapping".to_string(),
            ))
        }
    };
    for field in ["username", "password", "dsn"] {
        if !map.contains_key(field) {
            return Err(ToolError::InvalidConfig(format!(
                "missing required connection parameter: {field}"
            )));
        }
    }
    serde_json::from_value(Value::Object(map.clone()))
        .map_err(|e| ToolError::InvalidConfig(format!("connection: {e}")))
}

/// Constructor for `oracle_query` bound to a specific backend.
pub fn factory_with_backend(
    backend: Arc<dyn QueryBackend>,
) -> impl Fn(&ToolSpec) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync + 'static {
    move |spec| {
        let tool: Arc<dyn Tool> = Arc::new(OracleQueryTool::from_spec(spec, backend.clone())?);
        Ok(tool)
    }
}

#[async_trait]
impl Tool for OracleQueryTool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        let query_params = |description: &str| {
            serde_json::json!({
                "type": "object",
                "description": description,
                "additionalProperties": true
            })
        };
        if self.config.query.is_some() {
            return serde_json::json!({
                "type": "object",
                "properties": {
                    "query_params": query_params("Parameters to substitute in the fixed query template")
                },
                "required": []
            });
        }
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The SQL query to execute (if not using template)"
                },
                "template_name": {
                    "type": "string",
                    "description": "Name of predefined query template to use"
                },
                "query_params": query_params("Parameters to substitute in the query template")
            },
            "required": [],
            "anyOf": [
                {"required": ["query"]},
                {"required": ["template_name"]}
            ]
        })
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let (sql, binds) = self.prepare(&params)?;
        let timeout = Duration::from_secs(self.config.timeout);
        debug!(tool = %self.meta.name, binds = binds.len(), "executing query");

        let request = QueryRequest {
            sql: &sql,
            binds: &binds,
            connection: &self.connection,
            max_rows: self.config.max_rows,
            timeout,
        };
        let mut result = tokio::time::timeout(timeout, self.backend.query(request))
            .await
            .map_err(|_| ToolError::Timeout(timeout))??;

        if result.rows.len() > self.config.max_rows {
            result.rows.truncate(self.config.max_rows);
            result.has_more_rows = true;
        }

        Ok(ToolOutcome::success(serde_json::json!({
            "query": sql,
            "bind_params": binds,
            "columns": result.columns,
            "row_count": result.rows.len(),
            "rows": result.rows,
            "has_more_rows": result.has_more_rows,
            "max_rows_limit": self.config.max_rows,
        })))
    }
}
