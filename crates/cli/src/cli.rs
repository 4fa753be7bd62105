use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Load tool and agent definitions from YAML and work with them.
#[derive(Parser, Debug)]
#[command(name = "agentyard", version, about = "Config-driven tool registry and agent loader")]
pub struct CliArgs {
    /// Config file with `tools` and `root_agent` sections
    #[arg(long, global = true, default_value = "config.yaml", env = "AGENTYARD_CONFIG")]
    pub config: PathBuf,

    /// Abort the whole load on the first broken tool (default)
    #[arg(long, global = true, conflicts_with = "best_effort")]
    pub fail_fast: bool,

    /// Register every tool that loads and report the rest
    #[arg(long, global = true)]
    pub best_effort: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the config and report what was registered
    Validate,

    /// List registered tools
    Tools,

    /// Print a tool's parameter schema
    Schema { name: String },

    /// Execute a tool once and print the outcome
    Run {
        name: String,

        /// Invocation parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Build the root agent and print its tree
    Agent {
        /// Print the JSON manifest instead of the tree
        #[arg(long)]
        json: bool,
    },

    /// Check that environment variables are set
    EnvCheck {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Manage agent config backups
    Backup {
        /// Directory holding `{agent}.yaml` files
        #[arg(long, default_value = "./agents")]
        agents_dir: PathBuf,

        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Back up one agent
    Create {
        agent: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// Back up every agent config
    All {
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// List backups, newest first
    List { agent: Option<String> },

    /// Restore an agent from a backup file name
    Restore { filename: String },

    /// Keep only the newest backups per agent
    Cleanup {
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_run_with_globals_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "agentyard",
            "run",
            "reader",
            "--params",
            r#"{"path":"a.md"}"#,
            "--config",
            "other.yaml",
            "--best-effort",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("other.yaml"));
        assert!(args.best_effort);
        match args.command {
            Command::Run { name, params } => {
                assert_eq!(name, "reader");
                assert_eq!(params, r#"{"path":"a.md"}"#);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn policy_flags_conflict() {
        assert!(CliArgs::try_parse_from(["agentyard", "--fail-fast", "--best-effort", "tools"]).is_err());
    }

    #[test]
    fn backup_defaults() {
        let args = CliArgs::try_parse_from(["agentyard", "backup", "cleanup"]).unwrap();
        match args.command {
            Command::Backup { agents_dir, action: BackupAction::Cleanup { keep } } => {
                assert_eq!(agents_dir, PathBuf::from("./agents"));
                assert_eq!(keep, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn env_check_requires_names() {
        assert!(CliArgs::try_parse_from(["agentyard", "env-check"]).is_err());
    }
}
