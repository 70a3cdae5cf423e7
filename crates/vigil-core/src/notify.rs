//! Cooldown-gated alert delivery.
//!
//! Delivery itself is an external concern kept behind the [`Notifier`]
//! trait; the webhook implementation POSTs a JSON payload. The gate
//! prevents notification storms during sustained outages: critical alerts
//! and warnings each have their own minimum interval, tracked in the
//! persisted watchdog state.

use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::state::{WatchdogState, epoch_secs};

/// Alert severity classes with independent cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to delivery backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMessage {
    pub severity: AlertSeverity,
    pub title: String,
    pub body: String,
    /// Epoch seconds.
    pub ts: u64,
}

impl AlertMessage {
    #[must_use]
    pub fn new(severity: AlertSeverity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            body: body.into(),
            ts: epoch_secs(),
        }
    }
}

/// Async alert sender interface.
pub trait Notifier: Send + Sync {
    /// Sender identifier used in logs.
    fn name(&self) -> &'static str;

    /// Deliver the alert. Failures are reported, never panicked.
    fn send<'a>(&'a self, message: &'a AlertMessage) -> BoxFuture<'a, Result<(), String>>;
}

/// Webhook JSON POST sender.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send<'a>(&'a self, message: &'a AlertMessage) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.url)
                .json(message)
                .timeout(std::time::Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(format!("webhook returned {}", resp.status()))
            }
        })
    }
}

/// Per-severity cooldown gate over the persisted state timestamps.
#[derive(Debug, Clone, Copy)]
pub struct AlertGate {
    pub critical_cooldown_secs: u64,
    pub warn_cooldown_secs: u64,
}

impl AlertGate {
    #[must_use]
    pub fn new(critical_cooldown_secs: u64, warn_cooldown_secs: u64) -> Self {
        Self {
            critical_cooldown_secs,
            warn_cooldown_secs,
        }
    }

    /// Whether an alert of this severity may go out now.
    #[must_use]
    pub fn permits(&self, severity: AlertSeverity, state: &WatchdogState, now: u64) -> bool {
        let (last, cooldown) = match severity {
            AlertSeverity::Critical => (state.last_alert_at, self.critical_cooldown_secs),
            AlertSeverity::Warning => (state.last_warn_alert_at, self.warn_cooldown_secs),
        };
        last.is_none_or(|at| now.saturating_sub(at) >= cooldown)
    }

    /// Record a delivery so the cooldown starts counting.
    pub fn mark_sent(severity: AlertSeverity, state: &mut WatchdogState, now: u64) {
        match severity {
            AlertSeverity::Critical => state.last_alert_at = Some(now),
            AlertSeverity::Warning => state.last_warn_alert_at = Some(now),
        }
    }
}

/// Gate and deliver one alert, updating state timestamps on delivery.
pub async fn deliver_gated(
    notifier: Option<&dyn Notifier>,
    gate: AlertGate,
    message: &AlertMessage,
    state: &mut WatchdogState,
    now: u64,
) -> bool {
    let Some(notifier) = notifier else {
        return false;
    };
    if !gate.permits(message.severity, state, now) {
        tracing::debug!(severity = %message.severity, "alert suppressed by cooldown");
        return false;
    }
    match notifier.send(message).await {
        Ok(()) => {
            AlertGate::mark_sent(message.severity, state, now);
            tracing::info!(severity = %message.severity, title = %message.title, "alert delivered");
            true
        }
        Err(e) => {
            tracing::warn!(sender = notifier.name(), error = %e, "alert delivery failed");
            false
        }
    }
}
