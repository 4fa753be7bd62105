pub mod backup;
pub mod loader;
pub mod schema;

pub use backup::{
    backup_agent_config, backup_all_agents, cleanup_old_backups, list_backups,
    restore_agent_from_backup, BackupError, BackupInfo,
};
pub use loader::{
    build_agent, load_root_agent, root_agent_from_value, AgentError, AgentNode, BoundTool,
    DEFAULT_MODEL,
};
pub use schema::AgentSpec;
