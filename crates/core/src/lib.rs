pub mod config;
pub mod de;
pub mod env;
pub mod error;

pub use config::{load_config, load_config_with_env, load_dotenv, parse_yaml, read_yaml, section};
pub use env::{
    placeholders, resolve, resolve_str, resolve_with, validate_required_env_vars, EnvSource,
    Placeholder, ProcessEnv,
};
pub use error::{ConfigError, EnvResolutionError};

/// Configuration tree as parsed from YAML.
pub type ConfigValue = serde_yaml::Value;
