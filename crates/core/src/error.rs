use std::path::PathBuf;

use thiserror::Error;

/// A `${NAME}` placeholder referenced a variable that is unset and has no default.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("required environment variable '{name}' is not set{}", at_path(.path))]
pub struct EnvResolutionError {
    /// Variable name inside the placeholder.
    pub name: String,
    /// Dotted location in the config tree, when known (e.g. `tools.rally.config.api_key`).
    pub path: Option<String>,
}

fn at_path(path: &Option<String>) -> String {
    match path {
        Some(p) if !p.is_empty() => format!(" (at {p})"),
        _ => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Env(#[from] EnvResolutionError),

    #[error("invalid configuration at '{key}': {reason}")]
    Invalid { key: String, reason: String },

    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
