//! Bounded subprocess execution.
//!
//! Every external tool (git, package manager, systemctl, crontab) is driven
//! through [`run`] or [`run_unchecked`], which enforce a timeout and convert
//! failures into structured [`CommandError`] values. Nothing here panics or
//! blocks indefinitely.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Default timeout for short commands (status queries, checkouts).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for long-running steps (dependency install, build).
pub const LONG_TIMEOUT: Duration = Duration::from_secs(900);

/// Errors from driving an external command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The binary could not be spawned (usually: not installed).
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited non-zero.
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// The command exceeded its timeout and was killed.
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
}

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit status code (0 on success; -1 if terminated by signal).
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Trimmed stdout, convenient for single-line outputs like `git rev-parse`.
    #[must_use]
    pub fn stdout_trimmed(&self) -> String {
        self.stdout.trim().to_string()
    }
}

/// Run a command and require a zero exit status.
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CmdOutput, CommandError> {
    let out = run_unchecked(program, args, cwd, timeout).await?;
    if out.success() {
        Ok(out)
    } else {
        Err(CommandError::Failed {
            command: render(program, args),
            status: out.status,
            stderr: truncate(&out.stderr, 2048),
        })
    }
}

/// Run a command, returning the output regardless of exit status.
pub async fn run_unchecked(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CmdOutput, CommandError> {
    let command = render(program, args);
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.output();
    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(CommandError::Spawn { command, source }),
        Err(_) => {
            return Err(CommandError::Timeout {
                command,
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let result = CmdOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    tracing::debug!(
        command = %command,
        status = result.status,
        "external command finished"
    );
    Ok(result)
}

/// Run a `sh -c` shell line (declared build/start commands).
pub async fn run_shell(
    line: &str,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CmdOutput, CommandError> {
    let out = run_unchecked("sh", &["-c", line], cwd, timeout).await?;
    if out.success() {
        Ok(out)
    } else {
        Err(CommandError::Failed {
            command: line.to_string(),
            status: out.status,
            stderr: truncate(&out.stderr, 2048),
        })
    }
}

/// Whether a program is resolvable on PATH.
#[must_use]
pub fn which(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.trim().to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout() {
        let out = run("echo", &["hello"], None, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(out.stdout_trimmed(), "hello");
        assert!(out.success());
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let err = run("sh", &["-c", "echo bad >&2; exit 3"], None, DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert!(stderr.contains("bad"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn run_unchecked_tolerates_nonzero_exit() {
        let out = run_unchecked("sh", &["-c", "exit 1"], None, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(out.status, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = run("definitely-not-a-real-binary", &[], None, DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_slow_command() {
        let err = run("sleep", &["5"], None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[test]
    fn which_finds_sh() {
        assert!(which("sh").is_some());
        assert!(which("definitely-not-a-real-binary").is_none());
    }
}
