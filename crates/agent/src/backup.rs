//! Timestamped copies of agent config files.
//!
//! Agent configs live as `{agents_dir}/{agent}.yaml`. Backups are written to
//! `{agents_dir}/backups/{agent}.{reason}.{YYYYmmdd_HHMMSS_mmm}.yaml`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

const BACKUP_DIR: &str = "backups";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const PRE_RESTORE_REASON: &str = "pre-restore";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid backup name '{0}'")]
    InvalidName(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One backup file, as parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub agent_name: String,
    pub reason: String,
    /// Raw `YYYYmmdd_HHMMSS_mmm` stamp; sorts chronologically.
    pub timestamp: String,
    pub filename: String,
    pub path: PathBuf,
}

impl BackupInfo {
    /// Parse `{agent}.{reason}.{timestamp}.yaml`.
    pub fn parse(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_string();
        let stem = filename.strip_suffix(".yaml")?;
        let mut parts = stem.rsplitn(3, '.');
        let timestamp = parts.next()?;
        let reason = parts.next()?;
        let agent_name = parts.next()?;
        if agent_name.is_empty() || reason.is_empty() {
            return None;
        }
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            agent_name: agent_name.to_string(),
            reason: reason.to_string(),
            timestamp: timestamp.to_string(),
            path: path.to_path_buf(),
            filename,
        })
    }

    /// When the backup was taken, in local time.
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

fn check_component(kind: &str, value: &str) -> Result<(), BackupError> {
    if value.is_empty() || value.contains(['.', '/', '\\']) {
        return Err(BackupError::InvalidName(format!("{kind} '{value}'")));
    }
    Ok(())
}

pub fn backup_dir(agents_dir: &Path) -> PathBuf {
    agents_dir.join(BACKUP_DIR)
}

/// Copy `{agents_dir}/{name}.yaml` into the backup directory.
///
/// Returns `Ok(None)` when the agent has no config file.
pub fn backup_agent_config(name: &str, agents_dir: &Path, reason: &str) -> Result<Option<PathBuf>, BackupError> {
    check_component("agent", name)?;
    check_component("reason", reason)?;

    let source = agents_dir.join(format!("{name}.yaml"));
    if !source.is_file() {
        warn!(agent = %name, path = %source.display(), "agent config not found, nothing to back up");
        return Ok(None);
    }

    let dir = backup_dir(agents_dir);
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;

    let stamp = Local::now().format(TIMESTAMP_FORMAT);
    let target = dir.join(format!("{name}.{reason}.{stamp}.yaml"));
    fs::copy(&source, &target).map_err(io_err(&target))?;

    info!(agent = %name, reason = %reason, path = %target.display(), "backup created");
    Ok(Some(target))
}

/// Back up every `*.yaml` in `agents_dir`, skipping `config.example*`.
pub fn backup_all_agents(agents_dir: &Path, reason: &str) -> Result<Vec<PathBuf>, BackupError> {
    let mut names: Vec<String> = fs::read_dir(agents_dir)
        .map_err(io_err(agents_dir))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|file| !file.starts_with("config.example"))
        .filter_map(|file| file.strip_suffix(".yaml").map(str::to_string))
        .collect();
    names.sort();

    let mut created = Vec::with_capacity(names.len());
    for name in names {
        if check_component("agent", &name).is_err() {
            debug!(file = %name, "skipping config with unsupported name");
            continue;
        }
        if let Some(path) = backup_agent_config(&name, agents_dir, reason)? {
            created.push(path);
        }
    }
    Ok(created)
}

/// Backups newest first, optionally for one agent only.
pub fn list_backups(agents_dir: &Path, agent: Option<&str>) -> Result<Vec<BackupInfo>, BackupError> {
    let dir = backup_dir(agents_dir);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut backups: Vec<BackupInfo> = fs::read_dir(&dir)
        .map_err(io_err(&dir))?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let info = BackupInfo::parse(&path);
            if info.is_none() {
                debug!(path = %path.display(), "ignoring unrecognised file in backup dir");
            }
            info
        })
        .filter(|info| agent.map_or(true, |a| info.agent_name == a))
        .collect();

    backups.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.filename.cmp(&a.filename))
    });
    Ok(backups)
}

/// Restore an agent config from a backup file.
///
/// The current config, if any, is backed up with reason `pre-restore` first.
/// Returns the restored agent's name.
pub fn restore_agent_from_backup(backup: &Path, agents_dir: &Path) -> Result<String, BackupError> {
    let info = BackupInfo::parse(backup)
        .ok_or_else(|| BackupError::InvalidName(backup.display().to_string()))?;
    if !backup.is_file() {
        return Err(BackupError::Io {
            path: backup.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "backup file not found"),
        });
    }

    if let Some(pre) = backup_agent_config(&info.agent_name, agents_dir, PRE_RESTORE_REASON)? {
        debug!(path = %pre.display(), "pre-restore backup written");
    }

    let target = agents_dir.join(format!("{}.yaml", info.agent_name));
    fs::copy(backup, &target).map_err(io_err(&target))?;
    info!(agent = %info.agent_name, from = %backup.display(), "agent config restored");
    Ok(info.agent_name)
}

/// Delete all but the newest `keep` backups per agent. Returns how many
/// files were removed.
pub fn cleanup_old_backups(agents_dir: &Path, keep: usize) -> Result<usize, BackupError> {
    let mut per_agent: BTreeMap<String, Vec<BackupInfo>> = BTreeMap::new();
    for info in list_backups(agents_dir, None)? {
        per_agent.entry(info.agent_name.clone()).or_default().push(info);
    }

    let mut removed = 0;
    for (agent, backups) in per_agent {
        for stale in backups.into_iter().skip(keep) {
            fs::remove_file(&stale.path).map_err(io_err(&stale.path))?;
            debug!(agent = %agent, file = %stale.filename, "old backup removed");
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed, keep, "old backups cleaned up");
    }
    Ok(removed)
}
