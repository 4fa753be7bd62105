//! Rally Web Services API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{as_text, u64_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};

const DEFAULT_ENDPOINT: &str = "portfolioitem/ppmfeature";
const MAX_PAGE_SIZE: u64 = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RallyConfig {
    host: String,
    #[serde(rename = "api_key")]
    api_key: String,
    #[serde(default = "default_endpoint")]
    endpoint: String,
    /// Comma-separated string or a list of field names.
    #[serde(default)]
    fetch_fields: Option<Value>,
    #[serde(default)]
    default_query: Option<String>,
    #[serde(default = "default_results_path")]
    results_path: String,
    #[serde(default = "default_errors_path")]
    errors_path: String,
    #[serde(
        default = "default_timeout",
        deserialize_with = "agentyard_core::de::u64_lenient"
    )]
    timeout: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_results_path() -> String {
    "QueryResult.Results".to_string()
}

fn default_errors_path() -> String {
    "QueryResult.Errors".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Look up a dotted path (`QueryResult.Results`) in a JSON document.
pub fn get_nested_value<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(data, |current, key| current.get(key))
}

/// Query arguments may be passed flat or nested under `params`; flat wins.
fn argument<'a>(args: &'a Value, key: &str) -> Option<&'a Value> {
    args.get(key)
        .or_else(|| args.get("params").and_then(|p| p.get(key)))
        .filter(|v| !v.is_null())
}

/// Query a Rally endpoint with bearer authentication.
pub struct RallyAPITool {
    meta: ToolMeta,
    config: RallyConfig,
    /// `host` with a trailing `/` so endpoints append beneath it.
    base: url::Url,
    client: reqwest::Client,
}

impl RallyAPITool {
    pub fn from_spec(spec: &ToolSpec) -> Result<Self, ToolError> {
        let config: RallyConfig = spec.typed_config()?;
        if config.api_key.trim().is_empty() {
            return Err(ToolError::InvalidConfig(
                "Rally API credentials not configured: api_key is empty".to_string(),
            ));
        }
        let mut base = url::Url::parse(&config.host)
            .map_err(|e| ToolError::InvalidConfig(format!("invalid host '{}': {e}", config.host)))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ToolError::InvalidConfig(format!(
                "host must be an http(s) URL: {}",
                config.host
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        join_endpoint(&base, &config.endpoint).map_err(|e| ToolError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            config,
            base,
            client: reqwest::Client::new(),
        })
    }

    /// Build the query string for a call.
    ///
    /// A caller query is combined with the configured default as
    /// `(default and query)`. Pagination is always sent.
    pub fn collect_query_params(&self, args: &Value) -> Vec<(String, String)> {
        let mut out = Vec::new();

        let fetch = argument(args, "fetch")
            .map(as_text)
            .or_else(|| self.config.fetch_fields.as_ref().map(fetch_list));
        if let Some(fetch) = fetch.filter(|f| !f.is_empty()) {
            out.push(("fetch".to_string(), fetch));
        }

        let query = argument(args, "query").map(as_text).filter(|q| !q.is_empty());
        let default = self.config.default_query.as_deref().filter(|q| !q.is_empty());
        let combined = match (default, query) {
            (Some(d), Some(q)) => Some(format!("({d} and {q})")),
            (Some(d), None) => Some(d.to_string()),
            (None, q) => q,
        };
        if let Some(q) = combined {
            out.push(("query".to_string(), q));
        }

        for key in ["order", "workspace"] {
            if let Some(value) = argument(args, key).map(as_text) {
                out.push((key.to_string(), value));
            }
        }

        let start = pagination(args, "start").unwrap_or(1).max(1);
        let pagesize = pagination(args, "pagesize").unwrap_or(20).clamp(1, MAX_PAGE_SIZE);
        out.push(("start".to_string(), start.to_string()));
        out.push(("pagesize".to_string(), pagesize.to_string()));
        out
    }

    /// Shape a Rally response into the tool result.
    pub fn generate_message(&self, data: &Value) -> Result<Value, ToolError> {
        if data.is_null() {
            return Err(ToolError::ExecutionFailed(
                "no data available to generate message".to_string(),
            ));
        }
        let results = get_nested_value(data, &self.config.results_path)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let errors = get_nested_value(data, &self.config.errors_path)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));

        let mut message = Map::new();
        let count = results.as_array().map_or(1, Vec::len);
        message.insert("total_result_count".into(), count.into());

        if self.config.results_path.starts_with("QueryResult") {
            let qr = data.get("QueryResult");
            let field = |name: &str, default: u64| {
                qr.and_then(|q| q.get(name)).cloned().unwrap_or(default.into())
            };
            message.insert("total_result_count".into(), field("TotalResultCount", 0));
            message.insert("start_index".into(), field("StartIndex", 1));
            message.insert("page_size".into(), field("PageSize", 0));
        }
        message.insert("results".into(), results);

        if errors.as_array().is_some_and(|e| !e.is_empty()) {
            return Err(ToolError::ExecutionFailed(format!(
                "Rally reported errors: {errors}"
            )));
        }
        Ok(Value::Object(message))
    }

    fn endpoint_url(&self, args: &Value) -> Result<url::Url, ToolError> {
        let endpoint = argument(args, "endpoint")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.endpoint);
        join_endpoint(&self.base, endpoint)
    }
}

/// Resolve `endpoint` beneath `base`. The result must stay on the same origin
/// and under the base path, since the API key travels with the request.
fn join_endpoint(base: &url::Url, endpoint: &str) -> Result<url::Url, ToolError> {
    let rejected = || ToolError::InvalidInput(format!("endpoint not allowed: {endpoint}"));
    if endpoint.contains(['@', '\\']) || endpoint.contains("//") || endpoint.contains(':') {
        return Err(rejected());
    }
    let url = base
        .join(endpoint.trim_start_matches('/'))
        .map_err(|_| rejected())?;
    if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
        return Err(rejected());
    }
    Ok(url)
}

fn fetch_list(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(as_text).collect::<Vec<_>>().join(","),
        other => as_text(other),
    }
}

fn pagination(args: &Value, key: &str) -> Option<u64> {
    if args.get(key).is_some() {
        return u64_param(args, key);
    }
    args.get("params").and_then(|p| u64_param(p, key))
}

#[async_trait]
impl Tool for RallyAPITool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        let query_props = serde_json::json!({
            "query": {
                "type": "string",
                "description": "Rally query filter (e.g., '(State = \"In-Progress\") and (TechOwner contains \"Smith\")')"
            },
            "endpoint": {
                "type": "string",
                "description": "Rally API endpoint (default: portfolioitem/ppmfeature)",
                "default": DEFAULT_ENDPOINT
            },
            "order": {
                "type": "string",
                "description": "Field to order by (e.g., 'WSJFScore', 'Name')"
            },
            "start": {
                "type": "integer",
                "description": "Start index for pagination (1-based)",
                "default": 1
            },
            "pagesize": {
                "type": "integer",
                "description": "Number of items per page (max 200)",
                "default": 20
            },
            "fetch": {
                "type": "string",
                "description": "Comma-separated list of fields to fetch"
            }
        });
        let mut properties = query_props.as_object().cloned().unwrap_or_default();
        properties.insert(
            "workspace".into(),
            serde_json::json!({"type": "string", "description": "Workspace ID or reference"}),
        );
        properties.insert(
            "params".into(),
            serde_json::json!({
                "type": "object",
                "description": "Additional query parameters",
                "properties": query_props
            }),
        );
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": []
        })
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let url = self.endpoint_url(&params)?.to_string();
        let query = self.collect_query_params(&params);
        debug!(tool = %self.meta.name, url = %url, "Rally API request");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(self.config.timeout))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(url = %url, %status, "Rally API returned non-2xx status");
            return Ok(ToolOutcome::failure_with(
                format!("Rally API request failed with status {}", status.as_u16()),
                serde_json::json!({
                    "status_code": status.as_u16(),
                    "response": body,
                    "url": url,
                }),
            ));
        }

        let data: Value = response.json().await?;
        let mut message = self.generate_message(&data)?;
        message["url"] = Value::String(url);
        Ok(ToolOutcome::success(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tool(extra: &str) -> RallyAPITool {
        let yaml = format!("host: https://rally.example.com/slm/webservice/v2.0/\napi_key: k\n{extra}");
        let spec = ToolSpec::new("rally", "rally_api", serde_yaml::from_str(&yaml).unwrap());
        RallyAPITool::from_spec(&spec).unwrap()
    }

    #[test]
    fn endpoints_stay_under_host() {
        let rally = tool("");
        let url = rally.endpoint_url(&serde_json::json!({})).unwrap();
        assert_eq!(
            url.as_str(),
            "https://rally.example.com/slm/webservice/v2.0/portfolioitem/ppmfeature"
        );

        for endpoint in [
            "@evil.example/steal",
            "//evil.example/x",
            "https://evil.example/x",
            "../../other",
            "a\\b",
        ] {
            assert!(
                rally.endpoint_url(&serde_json::json!({"endpoint": endpoint})).is_err(),
                "{endpoint}"
            );
        }
    }

    #[test]
    fn host_without_trailing_slash_keeps_its_path() {
        let spec = ToolSpec::new(
            "rally",
            "rally_api",
            serde_yaml::from_str("host: https://rally1.rallydev.com/slm/webservice/v2.0\napi_key: k")
                .unwrap(),
        );
        let rally = RallyAPITool::from_spec(&spec).unwrap();
        let url = rally.endpoint_url(&serde_json::json!({"endpoint": "defect"})).unwrap();
        assert_eq!(url.as_str(), "https://rally1.rallydev.com/slm/webservice/v2.0/defect");
    }

    #[tokio::test]
    async fn foreign_endpoint_fails_without_request() {
        let outcome = tool("")
            .execute(serde_json::json!({"endpoint": "@evil.example/steal"}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("endpoint not allowed"));
    }

    fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn query_is_combined_with_default() {
        let rally = tool("defaultQuery: (State = \"Open\")\nfetchFields: [Name, FormattedID]\n");
        let pairs = rally.collect_query_params(&serde_json::json!({"query": "(Owner = \"me\")"}));
        assert_eq!(
            lookup(&pairs, "query"),
            Some("((State = \"Open\") and (Owner = \"me\"))")
        );
        assert_eq!(lookup(&pairs, "fetch"), Some("Name,FormattedID"));
        assert_eq!(lookup(&pairs, "start"), Some("1"));
        assert_eq!(lookup(&pairs, "pagesize"), Some("20"));
    }

    #[test]
    fn pagesize_is_capped_and_nested_params_read() {
        let rally = tool("");
        let pairs = rally.collect_query_params(&serde_json::json!({
            "params": {"pagesize": 1000, "start": "5", "order": "Name"}
        }));
        assert_eq!(lookup(&pairs, "pagesize"), Some("200"));
        assert_eq!(lookup(&pairs, "start"), Some("5"));
        assert_eq!(lookup(&pairs, "order"), Some("Name"));
        assert!(lookup(&pairs, "query").is_none());
    }

    #[test]
    fn nested_lookup() {
        let data = serde_json::json!({"QueryResult": {"Results": [1, 2]}});
        assert_eq!(
            get_nested_value(&data, "QueryResult.Results"),
            Some(&serde_json::json!([1, 2]))
        );
        assert!(get_nested_value(&data, "QueryResult.Missing").is_none());
        assert!(get_nested_value(&data, "").is_none());
    }

    #[test]
    fn message_uses_query_result_counters() {
        let rally = tool("");
        let data = serde_json::json!({
            "QueryResult": {
                "Results": [{"Name": "A"}],
                "Errors": [],
                "TotalResultCount": 57,
                "StartIndex": 21,
                "PageSize": 20
            }
        });
        let message = rally.generate_message(&data).unwrap();
        assert_eq!(message["total_result_count"], 57);
        assert_eq!(message["start_index"], 21);
        assert_eq!(message["results"][0]["Name"], "A");
    }

    #[test]
    fn reported_errors_fail() {
        let rally = tool("");
        let data = serde_json::json!({"QueryResult": {"Results": [], "Errors": ["bad query"]}});
        let err = rally.generate_message(&data).unwrap_err();
        assert!(err.to_string().contains("bad query"));
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let spec = ToolSpec::new(
            "rally",
            "rally_api",
            serde_yaml::from_str("host: https://rally.example.com/\napi_key: ''").unwrap(),
        );
        assert!(RallyAPITool::from_spec(&spec).is_err());

        let no_host = ToolSpec::new("rally", "rally_api", serde_yaml::from_str("api_key: k").unwrap());
        assert!(RallyAPITool::from_spec(&no_host).is_err());
    }

    #[tokio::test]
    async fn sends_bearer_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let body = r#"{"QueryResult":{"Results":[{"Name":"F1"}],"Errors":[],"TotalResultCount":1}}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });

        let spec = ToolSpec::new(
            "rally",
            "rally_api",
            serde_yaml::from_str(&format!("host: http://{addr}/\napi_key: secret")).unwrap(),
        );
        let rally = RallyAPITool::from_spec(&spec).unwrap();
        let outcome = rally.execute(serde_json::json!({"endpoint": "feature"})).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.result.unwrap()["total_result_count"], 1);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /feature?"));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
    }
}
