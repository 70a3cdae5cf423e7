//! Version-control capability.
//!
//! The pipeline drives git as a black box with pass/fail outcomes. The
//! state machine and pipeline depend only on the [`VersionControl`] trait;
//! the [`GitCli`] implementation shells out, and tests substitute fakes.

use std::path::PathBuf;

use crate::exec::{self, DEFAULT_TIMEOUT};
use crate::{BoxFuture, Result};

/// Read/write operations against the service checkout.
pub trait VersionControl: Send + Sync {
    /// Whether a repository is present at all. Absence is recorded, not fatal.
    fn is_repo(&self) -> bool;

    /// Current HEAD revision.
    fn head_revision(&self) -> BoxFuture<'_, Result<String>>;

    /// Whether the working tree has no uncommitted changes.
    fn is_clean(&self) -> BoxFuture<'_, Result<bool>>;

    /// Fetch the tracked remote.
    fn fetch(&self) -> BoxFuture<'_, Result<()>>;

    /// Commits the remote branch is ahead of HEAD.
    fn commits_behind(&self) -> BoxFuture<'_, Result<u64>>;

    /// Subject lines of incoming commits (HEAD..remote), newest first.
    fn incoming_messages(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Hard-reset the working tree to a specific revision.
    fn checkout<'a>(&'a self, revision: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Hard-reset the working tree to the remote branch head; returns the
    /// new HEAD revision.
    fn update_to_remote_head(&self) -> BoxFuture<'_, Result<String>>;
}

/// git CLI implementation.
#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
    remote: String,
    branch: String,
}

impl GitCli {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    async fn git(&self, args: &[&str]) -> Result<exec::CmdOutput> {
        Ok(exec::run("git", args, Some(&self.dir), DEFAULT_TIMEOUT).await?)
    }
}

impl VersionControl for GitCli {
    fn is_repo(&self) -> bool {
        self.dir.join(".git").exists()
    }

    fn head_revision(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let out = self.git(&["rev-parse", "HEAD"]).await?;
            Ok(out.stdout_trimmed())
        })
    }

    fn is_clean(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let out = self.git(&["status", "--porcelain"]).await?;
            Ok(out.stdout.trim().is_empty())
        })
    }

    fn fetch(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let remote = self.remote.clone();
            self.git(&["fetch", "--prune", &remote]).await?;
            Ok(())
        })
    }

    fn commits_behind(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let range = format!("HEAD..{}", self.remote_ref());
            let out = self.git(&["rev-list", "--count", &range]).await?;
            Ok(out.stdout_trimmed().parse().unwrap_or(0))
        })
    }

    fn incoming_messages(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let range = format!("HEAD..{}", self.remote_ref());
            let out = self.git(&["log", "--format=%s", &range]).await?;
            Ok(out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect())
        })
    }

    fn checkout<'a>(&'a self, revision: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.git(&["reset", "--hard", revision]).await?;
            Ok(())
        })
    }

    fn update_to_remote_head(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let target = self.remote_ref();
            self.git(&["reset", "--hard", &target]).await?;
            let out = self.git(&["rev-parse", "HEAD"]).await?;
            Ok(out.stdout_trimmed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo(dir: &std::path::Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@example.com"],
            vec!["config", "user.name", "t"],
        ] {
            exec::run("git", &args, Some(dir), DEFAULT_TIMEOUT)
                .await
                .unwrap();
        }
        std::fs::write(dir.join("a.txt"), "one").unwrap();
        exec::run("git", &["add", "."], Some(dir), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        exec::run("git", &["commit", "-m", "init"], Some(dir), DEFAULT_TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn head_revision_and_cleanliness() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path()).await;
        let vcs = GitCli::new(tmp.path(), "origin", "main");

        assert!(vcs.is_repo());
        let rev = vcs.head_revision().await.unwrap();
        assert_eq!(rev.len(), 40);
        assert!(vcs.is_clean().await.unwrap());

        std::fs::write(tmp.path().join("a.txt"), "two").unwrap();
        assert!(!vcs.is_clean().await.unwrap());
    }

    #[tokio::test]
    async fn checkout_restores_revision() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path()).await;
        let vcs = GitCli::new(tmp.path(), "origin", "main");
        let first = vcs.head_revision().await.unwrap();

        std::fs::write(tmp.path().join("a.txt"), "two").unwrap();
        exec::run("git", &["commit", "-am", "second"], Some(tmp.path()), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_ne!(vcs.head_revision().await.unwrap(), first);

        vcs.checkout(&first).await.unwrap();
        assert_eq!(vcs.head_revision().await.unwrap(), first);
        assert_eq!(std::fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "one");
    }

    #[test]
    fn non_repo_is_detected() {
        let tmp = TempDir::new().unwrap();
        let vcs = GitCli::new(tmp.path(), "origin", "main");
        assert!(!vcs.is_repo());
    }
}
