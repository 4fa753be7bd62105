//! Shell plumbing shared by the terminal tools: placeholder substitution,
//! allow-list checks and bounded subprocess execution.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::params::as_text;
use crate::tool::{ToolError, ToolOutcome};

/// Quote a value for `sh`. Values made only of safe characters pass through.
pub(crate) fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 4);
    quoted.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// A template split at its `{word}` placeholders.
enum Piece<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn scan_template(template: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let word_len = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if word_len > 0 && after[word_len..].starts_with('}') {
            pieces.push(Piece::Text(&rest[..open]));
            pieces.push(Piece::Placeholder(&after[..word_len]));
            rest = &after[word_len + 1..];
        } else {
            pieces.push(Piece::Text(&rest[..=open]));
            rest = after;
        }
    }
    pieces.push(Piece::Text(rest));
    pieces
}

/// Substitute each supplied `{key}` with its shell-quoted value.
///
/// The template is scanned once; substituted text is never re-scanned.
/// Placeholders without a supplied value are left as written.
pub(crate) fn replace_placeholders(template: &str, values: &Map<String, Value>) -> String {
    let mut command = String::with_capacity(template.len());
    for piece in scan_template(template) {
        match piece {
            Piece::Text(text) => command.push_str(text),
            Piece::Placeholder(name) => match values.get(name) {
                Some(value) => command.push_str(&shell_quote(&as_text(value))),
                None => {
                    command.push('{');
                    command.push_str(name);
                    command.push('}');
                }
            },
        }
    }
    command
}

/// Names of `{word}` placeholders in a template, in first-seen order.
pub(crate) fn template_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for piece in scan_template(template) {
        if let Piece::Placeholder(name) = piece {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

const DANGEROUS_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\n', '\r'];

pub(crate) fn contains_dangerous_chars(value: &str) -> bool {
    value.contains(DANGEROUS_CHARS)
}

/// Check the command's first word against the allow-list.
///
/// Entries are `*` (anything), an exact command name, or a `prefix*`.
/// An empty list allows nothing.
pub(crate) fn is_command_allowed(command: &str, allowed: &[String]) -> bool {
    let base = command.split_whitespace().next().unwrap_or("");
    allowed.iter().any(|entry| {
        if entry == "*" {
            true
        } else if let Some(prefix) = entry.strip_suffix('*') {
            base.starts_with(prefix)
        } else {
            entry == base
        }
    })
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// True when `dir` resolves inside one of `allowed`.
pub(crate) fn is_working_dir_allowed(dir: &str, allowed: &[String]) -> bool {
    let dir = absolute(Path::new(dir));
    allowed
        .iter()
        .any(|a| dir.starts_with(absolute(Path::new(a))))
}

pub(crate) async fn ensure_directory(dir: &str) -> Result<(), ToolError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ToolError::InvalidInput(format!(
            "working directory is not a directory: {dir}"
        ))),
        Err(_) => Err(ToolError::NotFound(format!(
            "working directory does not exist: {dir}"
        ))),
    }
}

fn truncate_output(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(&format!("\n... (output truncated at {max_chars} characters)"));
    cut
}

/// One subprocess invocation.
#[derive(Debug, Clone)]
pub(crate) struct ShellRun<'a> {
    pub command: &'a str,
    pub working_dir: &'a str,
    pub timeout: Duration,
    pub capture_output: bool,
    pub max_output_size: usize,
}

/// Run through `sh -c`. The child is killed if the timeout fires or the
/// future is dropped.
///
/// A non-zero exit or a timeout yields a failed outcome that still carries
/// the command report.
pub(crate) async fn run_shell(run: ShellRun<'_>) -> Result<ToolOutcome, ToolError> {
    debug!(
        command = run.command,
        working_dir = run.working_dir,
        timeout_secs = run.timeout.as_secs(),
        "executing shell command"
    );

    let (stdout, stderr) = if run.capture_output {
        (Stdio::piped(), Stdio::piped())
    } else {
        (Stdio::null(), Stdio::null())
    };
    let child = Command::new("sh")
        .arg("-c")
        .arg(run.command)
        .current_dir(run.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn shell: {e}")))?;

    let output = match tokio::time::timeout(run.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::ExecutionFailed(format!(
                "command execution error: {e}"
            )))
        }
        Err(_) => {
            warn!(command = run.command, timeout_secs = run.timeout.as_secs(), "command timed out");
            let error = format!(
                "Command exceeded timeout of {} seconds",
                run.timeout.as_secs()
            );
            return Ok(ToolOutcome::failure_with(
                error,
                serde_json::json!({
                    "command": run.command,
                    "working_dir": run.working_dir,
                    "return_code": -1,
                    "stdout": "",
                    "stderr": "Command timed out",
                }),
            ));
        }
    };

    let return_code = output.status.code().unwrap_or(-1);
    let report = serde_json::json!({
        "command": run.command,
        "working_dir": run.working_dir,
        "return_code": return_code,
        "stdout": truncate_output(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            run.max_output_size,
        ),
        "stderr": truncate_output(
            String::from_utf8_lossy(&output.stderr).into_owned(),
            run.max_output_size,
        ),
    });

    if output.status.success() {
        Ok(ToolOutcome::success(report))
    } else {
        debug!(return_code, "command returned non-zero exit code");
        Ok(ToolOutcome::failure_with(
            format!("command exited with code {return_code}"),
            report,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("report.txt"), "report.txt");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("x; rm -rf /"), "'x; rm -rf /'");
    }

    #[test]
    fn placeholders_are_quoted() {
        let values = serde_json::json!({"file": "my notes.txt", "n": 5});
        let cmd = replace_placeholders("head -n {n} {file} {other}", values.as_object().unwrap());
        assert_eq!(cmd, "head -n 5 'my notes.txt' {other}");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let values = serde_json::json!({"a": "{b}", "b": "$(echo X)"});
        let cmd = replace_placeholders("echo {a} {b}", values.as_object().unwrap());
        assert_eq!(cmd, "echo '{b}' '$(echo X)'");
    }

    #[test]
    fn finds_word_placeholders() {
        assert_eq!(
            template_placeholders("grep {pattern} {file} {file} {not valid} {}"),
            vec!["pattern", "file"]
        );
        assert!(template_placeholders("echo ${HOME}").contains(&"HOME".to_string()));
    }

    #[test]
    fn dangerous_characters() {
        for bad in ["a;b", "a&b", "a|b", "`x`", "$HOME", "(x)", "<in", ">out", "a\nb"] {
            assert!(contains_dangerous_chars(bad), "{bad:?}");
        }
        assert!(!contains_dangerous_chars("plain-value_1.txt"));
    }

    #[test]
    fn command_allow_list() {
        let allowed = vec!["ls".to_string(), "git*".to_string()];
        assert!(is_command_allowed("ls -la", &allowed));
        assert!(is_command_allowed("git-lfs status", &allowed));
        assert!(!is_command_allowed("lsblk", &allowed));
        assert!(!is_command_allowed("rm -rf /", &allowed));
        assert!(!is_command_allowed("ls", &[]));
        assert!(is_command_allowed("anything", &["*".to_string()]));
    }

    #[test]
    fn working_dir_allow_list() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        let allowed = vec![root.path().display().to_string()];

        let sub = root.path().join("sub");
        assert!(is_working_dir_allowed(sub.to_str().unwrap(), &allowed));
        assert!(!is_working_dir_allowed("/", &allowed));
        assert!(!is_working_dir_allowed(sub.to_str().unwrap(), &[]));
    }

    #[test]
    fn truncation_marks_output() {
        assert_eq!(truncate_output("abc".into(), 5), "abc");
        assert_eq!(
            truncate_output("abcdef".into(), 3),
            "abc\n... (output truncated at 3 characters)"
        );
    }

    #[tokio::test]
    async fn runs_and_reports() {
        let outcome = run_shell(ShellRun {
            command: "echo hi; echo err >&2",
            working_dir: ".",
            timeout: Duration::from_secs(5),
            capture_output: true,
            max_output_size: 100,
        })
        .await
        .unwrap();
        assert!(outcome.success);
        let report = outcome.result.unwrap();
        assert_eq!(report["stdout"], "hi\n");
        assert_eq!(report["stderr"], "err\n");
        assert_eq!(report["return_code"], 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_report() {
        let outcome = run_shell(ShellRun {
            command: "exit 3",
            working_dir: ".",
            timeout: Duration::from_secs(5),
            capture_output: true,
            max_output_size: 100,
        })
        .await
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.result.unwrap()["return_code"], 3);
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let outcome = run_shell(ShellRun {
            command: "sleep 5",
            working_dir: ".",
            timeout: Duration::from_millis(200),
            capture_output: true,
            max_output_size: 100,
        })
        .await
        .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timeout"));
    }
}
