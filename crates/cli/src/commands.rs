use std::path::Path;
use std::process::ExitCode;

use agentyard_agent::{self as agent, AgentNode};
use agentyard_tool_runtime::{LoadPolicy, LoadReport, ToolRegistry};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::{BackupAction, CliArgs, Command};

pub async fn dispatch(args: CliArgs) -> Result<ExitCode> {
    let policy = if args.best_effort {
        LoadPolicy::BestEffort
    } else {
        LoadPolicy::FailFast
    };

    match args.command {
        Command::Validate => validate(&args.config, policy),
        Command::Tools => {
            let (registry, _) = load_registry(&args.config, policy)?;
            for name in registry.list_tool_names() {
                let tool = registry.get_tool(&name)?;
                println!("{name}\t{}", tool.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Schema { name } => {
            let (registry, _) = load_registry(&args.config, policy)?;
            let schema = registry.get_tool_schema(&name)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { name, params } => run_tool(&args.config, policy, &name, &params).await,
        Command::Agent { json } => {
            let (registry, _) = load_registry(&args.config, policy)?;
            let root = agent::load_root_agent(&args.config, &registry)
                .with_context(|| format!("failed to build root agent from {}", args.config.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&root.manifest())?);
            } else {
                print_tree(&root, 0);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::EnvCheck { names } => match agentyard_core::validate_required_env_vars(&names) {
            Ok(()) => {
                println!("all {} variable(s) set", names.len());
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{e}");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Backup { agents_dir, action } => backup(&agents_dir, action),
    }
}

fn load_registry(config: &Path, policy: LoadPolicy) -> Result<(ToolRegistry, LoadReport)> {
    let registry = ToolRegistry::with_builtin_tools().with_policy(policy);
    let report = registry
        .load_from_config(config)
        .with_context(|| format!("failed to load tools from {}", config.display()))?;
    for failure in &report.failed {
        warn!(tool = %failure.tool, error = %failure.error, "tool not loaded");
    }
    info!(loaded = report.loaded.len(), skipped = report.skipped.len(), "tools loaded");
    Ok((registry, report))
}

fn validate(config: &Path, policy: LoadPolicy) -> Result<ExitCode> {
    let (registry, report) = load_registry(config, policy)?;

    println!("loaded {} tool(s)", report.loaded.len());
    for name in &report.loaded {
        println!("  ok       {name}");
    }
    for name in &report.skipped {
        println!("  disabled {name}");
    }
    for failure in &report.failed {
        println!("  failed   {}: {}", failure.tool, failure.error);
    }

    let doc = agentyard_core::read_yaml(config)?;
    if doc.get("root_agent").is_some() {
        match agent::root_agent_from_value(&doc, &registry) {
            Ok(root) => println!("root agent '{}' with {} agent(s)", root.name(), root.count()),
            Err(e) => {
                println!("root agent: {e}");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_tool(config: &Path, policy: LoadPolicy, name: &str, params: &str) -> Result<ExitCode> {
    let params: Value = serde_json::from_str(params).context("--params is not valid JSON")?;
    if !params.is_object() {
        bail!("--params must be a JSON object");
    }

    let (registry, _) = load_registry(config, policy)?;
    if !registry.has_tool(name) {
        bail!("tool '{name}' is not registered");
    }

    let outcome = registry.execute(name, params).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_tree(node: &AgentNode, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{indent}{} ({})", node.name(), node.model());
    for tool in node.tools() {
        println!("{indent}  - {}", tool.name());
    }
    for sub in node.sub_agents() {
        print_tree(sub, depth + 1);
    }
}

fn backup(agents_dir: &Path, action: BackupAction) -> Result<ExitCode> {
    match action {
        BackupAction::Create { agent: name, reason } => {
            match agent::backup_agent_config(&name, agents_dir, &reason)? {
                Some(path) => println!("backup created: {}", path.display()),
                None => {
                    eprintln!("no config for agent '{name}' in {}", agents_dir.display());
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        BackupAction::All { reason } => {
            let paths = agent::backup_all_agents(agents_dir, &reason)?;
            println!("created {} backup(s)", paths.len());
            for path in paths {
                println!("  {}", path.display());
            }
        }
        BackupAction::List { agent: name } => {
            let backups = agent::list_backups(agents_dir, name.as_deref())?;
            if backups.is_empty() {
                println!("no backups found");
            }
            for b in backups {
                let created = b
                    .created_at()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("{}\t{}\t{}\t{}", b.agent_name, b.reason, created, b.filename);
            }
        }
        BackupAction::Restore { filename } => {
            if Path::new(&filename).file_name() != Some(std::ffi::OsStr::new(&filename)) {
                bail!("backup must be a file name inside the backups directory: {filename}");
            }
            let path = agent::backup::backup_dir(agents_dir).join(&filename);
            let name = agent::restore_agent_from_backup(&path, agents_dir)
                .with_context(|| format!("failed to restore {filename}"))?;
            println!("restored '{name}' from {filename}");
        }
        BackupAction::Cleanup { keep } => {
            let removed = agent::cleanup_old_backups(agents_dir, keep)?;
            println!("removed {removed} old backup(s)");
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(config: &Path, rest: &[&str]) -> CliArgs {
        let mut argv = vec!["agentyard", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(rest);
        CliArgs::try_parse_from(argv).unwrap()
    }

    fn config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("config.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn run_reports_tool_failure_as_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = config(
            dir.path(),
            "tools:\n  sh:\n    class: safe_terminal\n    config:\n      command: 'false'\n",
        );

        let code = dispatch(args(&path, &["run", "sh"])).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn run_rejects_non_object_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = config(dir.path(), "tools: {}\n");
        assert!(dispatch(args(&path, &["run", "x", "--params", "[1]"])).await.is_err());
    }

    #[tokio::test]
    async fn validate_fails_on_broken_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = config(
            dir.path(),
            "tools: {}\nroot_agent:\n  name: a\n  description: d\n  instruction: i\n  tools: [missing]\n",
        );
        let code = dispatch(args(&path, &["validate"])).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn restore_refuses_paths_outside_backups() {
        let dir = tempfile::tempdir().unwrap();
        let agents = dir.path().join("agents");
        std::fs::create_dir_all(agents.join("backups")).unwrap();
        let outside = "x.manual.20240101_000000_000.yaml";
        std::fs::write(dir.path().join(outside), "name: x\n").unwrap();

        let escaped = format!("../../{outside}");
        let argv = [
            "agentyard",
            "backup",
            "--agents-dir",
            agents.to_str().unwrap(),
            "restore",
            escaped.as_str(),
        ];
        let result = dispatch(CliArgs::try_parse_from(argv).unwrap()).await;
        assert!(result.is_err());
        assert!(!agents.join("x.yaml").exists());
    }

    #[tokio::test]
    async fn best_effort_validate_exits_nonzero_on_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = config(
            dir.path(),
            "tools:\n  ok:\n    class: directory_list\n  bad:\n    class: no_such_tool\n",
        );
        let code = dispatch(args(&path, &["--best-effort", "validate"])).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);
        assert!(dispatch(args(&path, &["validate"])).await.is_err());
    }
}
