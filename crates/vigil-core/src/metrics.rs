//! Bounded metric log and growth trend detection.
//!
//! One sample per check cycle is appended to a JSONL file capped at a fixed
//! number of lines (ring semantics — oldest evicted first). The growth
//! detector is a heuristic leak detector: it compares current service RSS
//! against the sample a fixed window back. False positives under legitimate
//! load spikes are acceptable; slow leaks are the risk it mitigates.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Samples compared by the growth detector (current vs. this many back).
pub const GROWTH_WINDOW: usize = 30;

/// Relative RSS increase flagged as growth, in percent.
pub const GROWTH_THRESHOLD_PCT: f64 = 20.0;

/// One resource sample, immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Epoch seconds.
    pub ts: u64,
    pub mem_used_pct: f64,
    pub mem_avail_mb: u64,
    pub disk_used_pct: f64,
    pub service_rss_mb: u64,
    pub aux_mb: u64,
}

/// Ring-capped JSONL metric log.
#[derive(Debug, Clone)]
pub struct MetricsLog {
    path: PathBuf,
    max_lines: usize,
}

impl MetricsLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            path: path.into(),
            max_lines: max_lines.max(1),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a sample, evicting the oldest lines beyond the cap.
    pub fn record(&self, sample: &MetricSample) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lines: Vec<String> = match fs::read_to_string(&self.path) {
            Ok(raw) => raw.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        };
        lines.push(serde_json::to_string(sample)?);
        if lines.len() > self.max_lines {
            let drop = lines.len() - self.max_lines;
            lines.drain(..drop);
        }
        let mut body = lines.join("\n");
        body.push('\n');
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// All retained samples, oldest first. Unparseable lines are skipped.
    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => raw
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Relative RSS growth over the window, in percent.
    ///
    /// Returns `None` while fewer than [`GROWTH_WINDOW`] samples are
    /// retained or when the old sample recorded zero RSS.
    #[must_use]
    pub fn detect_growth(&self, current_rss_mb: u64) -> Option<f64> {
        let samples = self.samples();
        if samples.len() < GROWTH_WINDOW {
            return None;
        }
        let old = &samples[samples.len() - GROWTH_WINDOW];
        if old.service_rss_mb == 0 {
            return None;
        }
        let old_rss = old.service_rss_mb as f64;
        Some((current_rss_mb as f64 - old_rss) / old_rss * 100.0)
    }

    /// Whether the current RSS crosses the growth threshold.
    #[must_use]
    pub fn growth_flagged(&self, current_rss_mb: u64) -> Option<f64> {
        self.detect_growth(current_rss_mb)
            .filter(|pct| *pct > GROWTH_THRESHOLD_PCT)
    }

    /// One-line summary of the retained window for `status`.
    #[must_use]
    pub fn trend_summary(&self) -> String {
        let samples = self.samples();
        let Some(last) = samples.last() else {
            return "no metric samples recorded".to_string();
        };
        let growth = self
            .detect_growth(last.service_rss_mb)
            .map_or_else(String::new, |pct| format!(", rss {pct:+.1}% over window"));
        format!(
            "{} samples; mem {:.0}%, disk {:.0}%, service rss {} MB, aux {} MB{}",
            samples.len(),
            last.mem_used_pct,
            last.disk_used_pct,
            last.service_rss_mb,
            last.aux_mb,
            growth
        )
    }
}
