//! Config-driven tool registry.
//!
//! Tools are declared under the top-level `tools` mapping:
//!
//! ```yaml
//! tools:
//!   docs_reader:
//!     class: file_reader
//!     description: Read project documentation
//!     config:
//!       root_path: ./docs
//!       allowed_extensions: [".md"]
//! ```
//!
//! Each entry's placeholders are resolved, its `class` is looked up in the
//! [`FactoryTable`], and the constructed instance is stored under the entry's
//! key. Readers take a cheap snapshot of the live map, so a reload never
//! blocks or invalidates an in-flight execution.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use agentyard_core::{ConfigError, ConfigValue, EnvResolutionError, EnvSource, ProcessEnv};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::factory::{FactoryTable, ToolSpec};
use crate::tool::{Tool, ToolOutcome};

type ToolMap = HashMap<String, Arc<dyn Tool>>;

/// What to do when one tool in a batch cannot be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Abort on the first failure; nothing from the batch is committed.
    #[default]
    FailFast,
    /// Record failures and commit the tools that did build.
    BestEffort,
}

/// Outcome of one load or reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Declared with `enabled: false`.
    pub skipped: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub tool: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("tool '{tool}': unknown class '{class}'")]
    ToolClassNotFound { tool: String, class: String },

    #[error("tool '{tool}': construction failed: {reason}")]
    ToolConstruction { tool: String, reason: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

impl From<EnvResolutionError> for RegistryError {
    fn from(e: EnvResolutionError) -> Self {
        Self::Config(ConfigError::Env(e))
    }
}

impl RegistryError {
    /// Name of the tool the error is about, when it concerns a single tool.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::ToolClassNotFound { tool, .. }
            | Self::ToolConstruction { tool, .. }
            | Self::ToolNotFound(tool) => Some(tool),
            Self::Config(_) => None,
        }
    }
}

/// Builds tools from configuration and serves them by name.
pub struct ToolRegistry {
    factories: FactoryTable,
    policy: LoadPolicy,
    env: Arc<dyn EnvSource + Send + Sync>,
    tools: RwLock<Arc<ToolMap>>,
    /// Serializes load and reload so batches never interleave.
    load_lock: Mutex<()>,
}

impl ToolRegistry {
    pub fn new(factories: FactoryTable) -> Self {
        Self {
            factories,
            policy: LoadPolicy::default(),
            env: Arc::new(ProcessEnv),
            tools: RwLock::new(Arc::new(HashMap::new())),
            load_lock: Mutex::new(()),
        }
    }

    /// Registry backed by every built-in tool variant.
    pub fn with_builtin_tools() -> Self {
        Self::new(FactoryTable::builtin())
    }

    pub fn with_policy(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve placeholders against `env` instead of the process environment.
    pub fn with_env(mut self, env: impl EnvSource + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub fn factories(&self) -> &FactoryTable {
        &self.factories
    }

    /// Add or replace factories before loading (e.g. a real Oracle backend).
    pub fn factories_mut(&mut self) -> &mut FactoryTable {
        &mut self.factories
    }

    // ── Loading ───────────────────────────────────────────────────

    /// Load tools from a YAML file, merging them into the current set.
    pub fn load_from_config(&self, path: impl AsRef<Path>) -> Result<LoadReport, RegistryError> {
        let doc = agentyard_core::read_yaml(path.as_ref())?;
        info!(path = %path.as_ref().display(), "loading tools from config");
        self.load_from_value(&doc)
    }

    pub fn load_from_str(&self, yaml: &str) -> Result<LoadReport, RegistryError> {
        let doc = agentyard_core::parse_yaml(yaml)?;
        self.load_from_value(&doc)
    }

    /// Build every tool declared in `doc` and merge them into the current set;
    /// tools with the same name are replaced.
    pub fn load_from_value(&self, doc: &ConfigValue) -> Result<LoadReport, RegistryError> {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (built, report) = self.build(doc)?;

        let mut merged: ToolMap = (*self.snapshot()).clone();
        merged.extend(built);
        self.swap(merged);

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            total = self.len(),
            "tools loaded"
        );
        Ok(report)
    }

    /// Replace the whole tool set with the tools declared in a YAML file.
    pub fn reload_config(&self, path: impl AsRef<Path>) -> Result<LoadReport, RegistryError> {
        let doc = agentyard_core::read_yaml(path.as_ref())?;
        info!(path = %path.as_ref().display(), "reloading tools from config");
        self.reload_from_value(&doc)
    }

    pub fn reload_from_str(&self, yaml: &str) -> Result<LoadReport, RegistryError> {
        let doc = agentyard_core::parse_yaml(yaml)?;
        self.reload_from_value(&doc)
    }

    /// Build a fresh set and swap it in. On error the current set is kept.
    pub fn reload_from_value(&self, doc: &ConfigValue) -> Result<LoadReport, RegistryError> {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (built, report) = self.build(doc)?;
        self.swap(built);
        info!(loaded = report.loaded.len(), "tools reloaded");
        Ok(report)
    }

    fn build(&self, doc: &ConfigValue) -> Result<(ToolMap, LoadReport), RegistryError> {
        let mut built = ToolMap::new();
        let mut report = LoadReport::default();

        let entries = match doc.get("tools") {
            None | Some(ConfigValue::Null) => {
                warn!("config has no 'tools' section");
                return Ok((built, report));
            }
            Some(ConfigValue::Mapping(map)) => map,
            Some(_) => return Err(ConfigError::invalid("tools", "expected a mapping").into()),
        };

        for (key, raw) in entries {
            let name = match key.as_str() {
                Some(name) => name.to_string(),
                None => {
                    return Err(
                        ConfigError::invalid("tools", format!("non-string tool name: {key:?}"))
                            .into(),
                    )
                }
            };

            match self.build_one(&name, raw) {
                Ok(Some(tool)) => {
                    debug!(tool = %name, "tool built");
                    report.loaded.push(name.clone());
                    built.insert(name, tool);
                }
                Ok(None) => {
                    info!(tool = %name, "tool disabled, skipping");
                    report.skipped.push(name);
                }
                Err(e) => match self.policy {
                    LoadPolicy::FailFast => return Err(e),
                    LoadPolicy::BestEffort => {
                        warn!(tool = %name, error = %e, "failed to load tool");
                        report.failed.push(LoadFailure {
                            tool: name,
                            error: e.to_string(),
                        });
                    }
                },
            }
        }
        Ok((built, report))
    }

    fn build_one(&self, name: &str, raw: &ConfigValue) -> Result<Option<Arc<dyn Tool>>, RegistryError> {
        // Disabled entries may carry placeholders nobody has set.
        if !self.is_enabled(name, raw)? {
            return Ok(None);
        }

        let resolved = agentyard_core::resolve_with(raw, self.env.as_ref())
            .map_err(|e| under_tool(name, e))?;

        let mut spec: ToolSpec = serde_yaml::from_value(resolved)
            .map_err(|e| ConfigError::invalid(format!("tools.{name}"), e.to_string()))?;
        spec.name = name.to_string();

        let ctor = self
            .factories
            .get(&spec.class_path)
            .ok_or_else(|| RegistryError::ToolClassNotFound {
                tool: name.to_string(),
                class: spec.class_path.clone(),
            })?;
        let tool = ctor(&spec).map_err(|e| RegistryError::ToolConstruction {
            tool: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(tool))
    }

    fn is_enabled(&self, name: &str, raw: &ConfigValue) -> Result<bool, RegistryError> {
        let Some(flag) = raw.get("enabled") else {
            return Ok(true);
        };
        let flag = agentyard_core::resolve_with(flag, self.env.as_ref()).map_err(|e| {
            EnvResolutionError {
                name: e.name,
                path: Some(format!("tools.{name}.enabled")),
            }
        })?;
        agentyard_core::de::bool_lenient(flag)
            .map_err(|e| ConfigError::invalid(format!("tools.{name}.enabled"), e.to_string()).into())
    }

    fn snapshot(&self) -> Arc<ToolMap> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, next: ToolMap) {
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    // ── Lookup ────────────────────────────────────────────────────

    pub fn has_tool(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    pub fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ToolNotFound(name.to_string()))
    }

    pub fn get_all_available_tools(&self) -> BTreeSet<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// Tool names, sorted.
    pub fn list_tool_names(&self) -> Vec<String> {
        self.get_all_available_tools().into_iter().collect()
    }

    pub fn get_tool_schema(&self, name: &str) -> Result<Value, RegistryError> {
        Ok(self.get_tool(name)?.schema())
    }

    pub fn get_all_schemas(&self) -> BTreeMap<String, Value> {
        self.snapshot()
            .iter()
            .map(|(name, tool)| (name.clone(), tool.schema()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Execute a tool by name. Unknown names yield a failed outcome.
    pub async fn execute(&self, name: &str, params: Value) -> ToolOutcome {
        match self.get_tool(name) {
            Ok(tool) => tool.execute(params).await,
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtin_tools()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("policy", &self.policy)
            .field("tools", &self.list_tool_names())
            .finish()
    }
}

/// Re-root an env error found inside one tool entry.
fn under_tool(name: &str, e: EnvResolutionError) -> EnvResolutionError {
    let at = match e.path.as_deref() {
        Some(p) if !p.is_empty() => format!("tools.{name}.{p}"),
        _ => format!("tools.{name}"),
    };
    EnvResolutionError {
        name: e.name,
        path: Some(at),
    }
}
