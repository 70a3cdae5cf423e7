//! Point-in-time system state capture.
//!
//! A snapshot is an immutable directory under the state dir holding a
//! manifest plus byte copies of the service configuration and dependency
//! lockfile. One pointer file designates the latest snapshot; repointing
//! is atomic. Older snapshots persist until externally pruned — automatic
//! GC is a non-goal.
//!
//! Missing optional artifacts (no git checkout, no lockfile, no config)
//! are recorded as absent, never fatal: a snapshot that says "there was no
//! revision" is still rollback material for everything else it captured.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::VigilConfig;
use crate::git::VersionControl;
use crate::service_config::ServiceConfigView;
use crate::state::epoch_secs;

/// Name of the copied service configuration inside a snapshot dir.
const CONFIG_COPY: &str = "config.json";

/// Name of the latest-pointer file under the snapshot root.
const LATEST_POINTER: &str = "latest";

/// Directories never descended into while scanning the checkout.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "dist", ".cache"];

/// Maximum directory depth scanned for artifacts and symlinks.
const SCAN_DEPTH: usize = 6;

/// Errors during snapshot capture or retrieval.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("too many snapshots share the timestamp {0}")]
    IdCollision(String),
}

/// Everything recorded about one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub id: String,
    /// Epoch seconds at capture time.
    pub created_at: u64,
    /// Service version string, if readable.
    pub version: Option<String>,
    /// VCS revision of the checkout, if a repository was present.
    pub revision: Option<String>,
    /// Service reachability observed at capture time ("up"/"down").
    pub service_status: String,
    /// Channel identifiers parsed from the service config.
    pub channels: Vec<String>,
    /// Primary model parsed from the service config.
    pub primary_model: Option<String>,
    /// Sorted relative paths of plugin-like artifact files.
    pub artifacts: Vec<String>,
    /// Sorted relative paths of symbolic links in the checkout.
    pub symlinks: Vec<String>,
    /// Whether a config copy is present in the snapshot dir.
    pub config_copied: bool,
    /// Original name of the copied dependency lockfile, if any.
    pub lockfile: Option<String>,
}

/// A snapshot on disk: manifest plus its directory.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub manifest: SnapshotManifest,
    pub dir: PathBuf,
}

impl Snapshot {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Bytes of the captured service configuration, if one was copied.
    #[must_use]
    pub fn config_bytes(&self) -> Option<Vec<u8>> {
        if !self.manifest.config_copied {
            return None;
        }
        fs::read(self.dir.join(CONFIG_COPY)).ok()
    }
}

/// Store managing the snapshot directory tree and the latest pointer.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capture a snapshot of the current system state and repoint latest.
    pub async fn take(
        &self,
        cfg: &VigilConfig,
        vcs: &dyn VersionControl,
        service_up: bool,
    ) -> Result<Snapshot, SnapshotError> {
        fs::create_dir_all(&self.root)?;

        let revision = if vcs.is_repo() {
            match vcs.head_revision().await {
                Ok(rev) => Some(rev),
                Err(e) => {
                    tracing::warn!(error = %e, "could not read HEAD revision, recording absent");
                    None
                }
            }
        } else {
            None
        };

        let version = read_version(&cfg.service_dir.join(&cfg.version_file));
        let view = ServiceConfigView::load(&cfg.config_path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "service config unreadable, recording empty view");
            ServiceConfigView::default()
        });

        let artifacts = scan_artifacts(
            &cfg.service_dir,
            &cfg.artifact_suffix,
            &cfg.artifact_suffix_alt,
        );
        let symlinks = scan_symlinks(&cfg.service_dir);

        let (id, dir) = self.allocate_dir()?;
        let tmp = self.root.join(format!(".tmp-{id}"));
        fs::create_dir_all(&tmp)?;

        let config_copied = match fs::read(&cfg.config_path) {
            Ok(bytes) => {
                fs::write(tmp.join(CONFIG_COPY), bytes)?;
                true
            }
            Err(_) => false,
        };

        let lockfile = copy_lockfile(&cfg.service_dir, &tmp)?;

        let manifest = SnapshotManifest {
            id: id.clone(),
            created_at: epoch_secs(),
            version,
            revision,
            service_status: if service_up { "up" } else { "down" }.to_string(),
            channels: view.channels,
            primary_model: view.primary_model,
            artifacts,
            symlinks,
            config_copied,
            lockfile,
        };
        fs::write(
            tmp.join("manifest.json"),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        fs::rename(&tmp, &dir)?;
        self.repoint_latest(&id)?;
        tracing::info!(id = %id, "snapshot captured");

        Ok(Snapshot { manifest, dir })
    }

    /// The snapshot the latest pointer designates, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Snapshot> {
        let id = fs::read_to_string(self.root.join(LATEST_POINTER)).ok()?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        match self.load(id) {
            Some(snapshot) => Some(snapshot),
            None => {
                tracing::warn!(id, "latest pointer names a missing or corrupt snapshot");
                None
            }
        }
    }

    /// All snapshots, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Snapshot> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut snapshots: Vec<Snapshot> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                self.load(&name)
            })
            .collect();
        snapshots.sort_by(|a, b| b.manifest.id.cmp(&a.manifest.id));
        snapshots
    }

    fn load(&self, id: &str) -> Option<Snapshot> {
        let dir = self.root.join(id);
        let raw = fs::read_to_string(dir.join("manifest.json")).ok()?;
        let manifest: SnapshotManifest = serde_json::from_str(&raw).ok()?;
        Some(Snapshot { manifest, dir })
    }

    /// Atomically repoint the latest indirection.
    fn repoint_latest(&self, id: &str) -> Result<(), SnapshotError> {
        let tmp = self.root.join(".latest.tmp");
        fs::write(&tmp, id)?;
        fs::rename(&tmp, self.root.join(LATEST_POINTER))?;
        Ok(())
    }

    /// Pick a unique timestamp-derived id and its final directory.
    fn allocate_dir(&self) -> Result<(String, PathBuf), SnapshotError> {
        let base = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let candidate = self.root.join(&base);
        if !candidate.exists() {
            return Ok((base, candidate));
        }
        for counter in 2..=100u32 {
            let id = format!("{base}-{counter}");
            let dir = self.root.join(&id);
            if !dir.exists() {
                return Ok((id, dir));
            }
        }
        Err(SnapshotError::IdCollision(base))
    }
}

/// Read the service version: `version` key for JSON files, trimmed
/// content otherwise.
pub fn read_version(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    if path.extension().is_some_and(|ext| ext == "json") {
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        value
            .get("version")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    } else {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Copy the first recognized dependency lockfile into the snapshot dir.
fn copy_lockfile(service_dir: &Path, into: &Path) -> Result<Option<String>, SnapshotError> {
    for name in ["package-lock.json", "pnpm-lock.yaml", "yarn.lock"] {
        let source = service_dir.join(name);
        if source.is_file() {
            fs::copy(&source, into.join(name))?;
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

/// Sorted relative paths of artifact files matching either naming
/// convention.
pub fn scan_artifacts(dir: &Path, suffix: &str, suffix_alt: &str) -> Vec<String> {
    let mut found = Vec::new();
    walk(dir, dir, 0, &mut |rel, meta| {
        if meta.is_file() {
            let name = rel.rsplit('/').next().unwrap_or(rel);
            if name.ends_with(suffix) || name.ends_with(suffix_alt) {
                found.push(rel.to_string());
            }
        }
    });
    found.sort();
    found
}

/// Sorted relative paths of symbolic links in the checkout.
pub fn scan_symlinks(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    walk(dir, dir, 0, &mut |rel, meta| {
        if meta.is_symlink() {
            found.push(rel.to_string());
        }
    });
    found.sort();
    found
}

/// Depth-bounded recursive walk that never follows symlinks.
fn walk(root: &Path, dir: &Path, depth: usize, visit: &mut impl FnMut(&str, &fs::FileType)) {
    if depth > SCAN_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        let file_type = meta.file_type();
        let rel = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        visit(&rel, &file_type);
        if file_type.is_dir() {
            let name = entry.file_name();
            if SKIP_DIRS.iter().any(|skip| name == std::ffi::OsStr::new(skip)) {
                continue;
            }
            walk(root, &path, depth + 1, visit);
        }
    }
}
