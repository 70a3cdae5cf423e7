//! Service-supervisor capability.
//!
//! Start/stop/restart of the managed service and access to its recent
//! logs. A systemd unit is the preferred path; when `systemctl` is not
//! available the process supervisor falls back to kill + relaunch with a
//! declared start command.

use std::path::PathBuf;

use crate::error::Error;
use crate::exec::{self, DEFAULT_TIMEOUT};
use crate::{BoxFuture, Result};

/// Lifecycle control over the managed service.
pub trait ServiceSupervisor: Send + Sync {
    /// Supervisor flavor for logs ("systemd", "process").
    fn kind(&self) -> &'static str;

    /// Whether the supervisor believes the service is running.
    fn is_active(&self) -> BoxFuture<'_, Result<bool>>;

    fn start(&self) -> BoxFuture<'_, Result<()>>;

    fn stop(&self) -> BoxFuture<'_, Result<()>>;

    fn restart(&self) -> BoxFuture<'_, Result<()>>;

    /// Raw log text covering roughly the last `since_secs` seconds.
    fn recent_logs(&self, since_secs: u64) -> BoxFuture<'_, Result<String>>;
}

/// systemd-backed supervisor (`systemctl` / `journalctl`).
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    unit: String,
    user: bool,
}

impl SystemdSupervisor {
    #[must_use]
    pub fn new(unit: impl Into<String>, user: bool) -> Self {
        Self {
            unit: unit.into(),
            user,
        }
    }

    fn scope_args<'a>(&self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(rest.len() + 1);
        if self.user {
            args.push("--user");
        }
        args.extend_from_slice(rest);
        args
    }
}

impl ServiceSupervisor for SystemdSupervisor {
    fn kind(&self) -> &'static str {
        "systemd"
    }

    fn is_active(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let args = self.scope_args(&["is-active", "--quiet", &self.unit]);
            let out = exec::run_unchecked("systemctl", &args, None, DEFAULT_TIMEOUT).await?;
            Ok(out.success())
        })
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let args = self.scope_args(&["start", &self.unit]);
            exec::run("systemctl", &args, None, DEFAULT_TIMEOUT).await?;
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let args = self.scope_args(&["stop", &self.unit]);
            exec::run("systemctl", &args, None, DEFAULT_TIMEOUT).await?;
            Ok(())
        })
    }

    fn restart(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tracing::info!(unit = %self.unit, "issuing supervised restart");
            let args = self.scope_args(&["restart", &self.unit]);
            exec::run("systemctl", &args, None, DEFAULT_TIMEOUT).await?;
            Ok(())
        })
    }

    fn recent_logs(&self, since_secs: u64) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let since = format!("-{since_secs} seconds");
            let args =
                self.scope_args(&["-u", &self.unit, "--since", &since, "--no-pager", "-o", "cat"]);
            let out = exec::run_unchecked("journalctl", &args, None, DEFAULT_TIMEOUT).await?;
            Ok(out.stdout)
        })
    }
}

/// Fallback supervisor: pattern kill + declared relaunch command.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    pattern: String,
    start_command: Option<String>,
    service_dir: PathBuf,
    log_file: Option<PathBuf>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(
        pattern: impl Into<String>,
        start_command: Option<String>,
        service_dir: impl Into<PathBuf>,
    ) -> Self {
        let service_dir = service_dir.into();
        let log_file = Some(service_dir.join("service.log"));
        Self {
            pattern: pattern.into(),
            start_command,
            service_dir,
            log_file,
        }
    }

    fn start_command(&self) -> Result<&str> {
        self.start_command.as_deref().ok_or_else(|| {
            Error::Config(
                "no supervisor available and VIGIL_START_COMMAND is not set".to_string(),
            )
        })
    }
}

impl ServiceSupervisor for ProcessSupervisor {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn is_active(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let out =
                exec::run_unchecked("pgrep", &["-f", &self.pattern], None, DEFAULT_TIMEOUT).await?;
            Ok(out.success())
        })
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let cmd = self.start_command()?;
            tracing::info!(command = cmd, "relaunching service process");
            // Detach so the service outlives this invocation.
            let line = format!("nohup {cmd} >> service.log 2>&1 &");
            exec::run_shell(&line, Some(&self.service_dir), DEFAULT_TIMEOUT).await?;
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // pkill exits 1 when nothing matched; that still counts as stopped.
            exec::run_unchecked("pkill", &["-f", &self.pattern], None, DEFAULT_TIMEOUT).await?;
            Ok(())
        })
    }

    fn restart(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stop().await?;
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            self.start().await
        })
    }

    fn recent_logs(&self, _since_secs: u64) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let Some(path) = self.log_file.as_ref() else {
                return Ok(String::new());
            };
            match std::fs::read_to_string(path) {
                Ok(raw) => {
                    // Without journal timestamps, approximate the window with
                    // the last chunk of the file.
                    const TAIL_BYTES: usize = 64 * 1024;
                    let start = raw.len().saturating_sub(TAIL_BYTES);
                    Ok(raw[start..].to_string())
                }
                Err(_) => Ok(String::new()),
            }
        })
    }
}

/// Choose the best available supervisor for this host.
#[must_use]
pub fn resolve_supervisor(
    unit: &str,
    process_pattern: &str,
    start_command: Option<String>,
    service_dir: &std::path::Path,
) -> Box<dyn ServiceSupervisor> {
    if exec::which("systemctl").is_some() {
        Box::new(SystemdSupervisor::new(unit, !is_root()))
    } else {
        tracing::debug!("systemctl not found, falling back to process supervision");
        Box::new(ProcessSupervisor::new(
            process_pattern,
            start_command,
            service_dir,
        ))
    }
}

/// Effective-uid check without unsafe code: parse /proc/self/status.
#[cfg(target_os = "linux")]
pub(crate) fn is_root() -> bool {
    let Ok(contents) = std::fs::read_to_string("/proc/self/status") else {
        return false;
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            return rest.split_whitespace().next() == Some("0");
        }
    }
    false
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn is_root() -> bool {
    false
}
