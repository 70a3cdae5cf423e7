//! Package-manager capability.
//!
//! Dependency reinstall and the optional declared build step, driven as
//! black boxes. The manager flavor is chosen from the lockfile present in
//! the service checkout; no package manager at all is a configuration
//! error surfaced immediately, not retried.

use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::exec::{self, LONG_TIMEOUT};
use crate::{BoxFuture, Result};

/// Dependency installation and build.
pub trait PackageManager: Send + Sync {
    /// Short name for logs ("npm", "pnpm", …).
    fn name(&self) -> &'static str;

    /// Lockfile name this manager owns, if one was found.
    fn lockfile(&self) -> Option<String>;

    /// Reinstall dependencies from the lockfile.
    fn install(&self) -> BoxFuture<'_, Result<()>>;

    /// Run the declared build step. Resolves `false` when none is declared.
    fn build(&self) -> BoxFuture<'_, Result<bool>>;
}

/// Node-ecosystem manager flavors, detected from the lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeFlavor {
    Npm,
    Pnpm,
    Yarn,
}

impl NodeFlavor {
    fn detect(dir: &Path) -> Option<(Self, String)> {
        for (flavor, lockfile) in [
            (NodeFlavor::Pnpm, "pnpm-lock.yaml"),
            (NodeFlavor::Yarn, "yarn.lock"),
            (NodeFlavor::Npm, "package-lock.json"),
        ] {
            if dir.join(lockfile).exists() {
                return Some((flavor, lockfile.to_string()));
            }
        }
        None
    }

    fn binary(self) -> &'static str {
        match self {
            NodeFlavor::Npm => "npm",
            NodeFlavor::Pnpm => "pnpm",
            NodeFlavor::Yarn => "yarn",
        }
    }

    fn install_args(self) -> &'static [&'static str] {
        match self {
            NodeFlavor::Npm => &["ci"],
            NodeFlavor::Pnpm => &["install", "--frozen-lockfile"],
            NodeFlavor::Yarn => &["install", "--frozen-lockfile"],
        }
    }
}

/// Shell-out package manager for a Node-style service checkout.
#[derive(Debug, Clone)]
pub struct NodePackageManager {
    dir: PathBuf,
    flavor: NodeFlavor,
    lockfile: String,
    build_command: Option<String>,
}

impl NodePackageManager {
    /// Detect the manager for `dir`. Errors when no lockfile is present or
    /// the manager binary is not installed.
    pub fn detect(dir: impl Into<PathBuf>, build_command: Option<String>) -> Result<Self> {
        let dir = dir.into();
        let (flavor, lockfile) = NodeFlavor::detect(&dir).ok_or_else(|| {
            Error::Config(format!(
                "no dependency lockfile found in {}",
                dir.display()
            ))
        })?;
        if exec::which(flavor.binary()).is_none() {
            return Err(Error::Config(format!(
                "package manager `{}` is not installed",
                flavor.binary()
            )));
        }
        Ok(Self {
            dir,
            flavor,
            lockfile,
            build_command,
        })
    }
}

impl PackageManager for NodePackageManager {
    fn name(&self) -> &'static str {
        self.flavor.binary()
    }

    fn lockfile(&self) -> Option<String> {
        Some(self.lockfile.clone())
    }

    fn install(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tracing::info!(manager = self.name(), "reinstalling dependencies");
            exec::run(
                self.flavor.binary(),
                self.flavor.install_args(),
                Some(&self.dir),
                LONG_TIMEOUT,
            )
            .await?;
            Ok(())
        })
    }

    fn build(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let Some(cmd) = self.build_command.as_deref() else {
                return Ok(false);
            };
            tracing::info!(command = cmd, "running build step");
            exec::run_shell(cmd, Some(&self.dir), LONG_TIMEOUT).await?;
            Ok(true)
        })
    }
}

/// Placeholder used when detection failed: the check cycle can still run,
/// but any path that actually needs the package manager surfaces the
/// original detection error.
#[derive(Debug, Clone)]
pub struct UnavailablePackageManager {
    reason: String,
}

impl UnavailablePackageManager {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PackageManager for UnavailablePackageManager {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn lockfile(&self) -> Option<String> {
        None
    }

    fn install(&self) -> BoxFuture<'_, Result<()>> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(Error::Config(reason)) })
    }

    fn build(&self) -> BoxFuture<'_, Result<bool>> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(Error::Config(reason)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detect_prefers_pnpm_lockfile() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("pnpm-lock.yaml"), "").unwrap();
        std::fs::write(tmp.path().join("package-lock.json"), "{}").unwrap();
        let (flavor, lockfile) = NodeFlavor::detect(tmp.path()).unwrap();
        assert_eq!(flavor, NodeFlavor::Pnpm);
        assert_eq!(lockfile, "pnpm-lock.yaml");
    }

    #[test]
    fn detect_fails_without_lockfile() {
        let tmp = TempDir::new().unwrap();
        let err = NodePackageManager::detect(tmp.path(), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn build_without_declared_step_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("package-lock.json"), "{}").unwrap();
        // npm may be missing in minimal environments; construct directly.
        let pkg = NodePackageManager {
            dir: tmp.path().to_path_buf(),
            flavor: NodeFlavor::Npm,
            lockfile: "package-lock.json".to_string(),
            build_command: None,
        };
        assert!(!pkg.build().await.unwrap());
    }

    #[tokio::test]
    async fn build_runs_declared_command() {
        let tmp = TempDir::new().unwrap();
        let pkg = NodePackageManager {
            dir: tmp.path().to_path_buf(),
            flavor: NodeFlavor::Npm,
            lockfile: "package-lock.json".to_string(),
            build_command: Some("touch built.txt".to_string()),
        };
        assert!(pkg.build().await.unwrap());
        assert!(tmp.path().join("built.txt").exists());
    }
}
