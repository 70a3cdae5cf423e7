//! Failure-escalation decisions.
//!
//! Pure functions over the persisted watchdog state: no I/O, no clock.
//! The check cycle feeds in probe results and the current time; this
//! module answers "what, if anything, should be done now". Escalation
//! policy: restart is always tried first, and rollback is only reached
//! after restart has been tried and the failure count doubles past the
//! threshold — a persistent failure gets the cheap fix before the slow,
//! invasive one.

use serde::{Deserialize, Serialize};

use crate::state::{RemedialAction, WatchdogState};

/// Escalation tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Consecutive failures before any action is considered.
    pub fail_threshold: u32,
    /// Minimum seconds between two remedial actions.
    pub cooldown_secs: u64,
}

impl EscalationPolicy {
    #[must_use]
    pub fn new(fail_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            fail_threshold: fail_threshold.max(1),
            cooldown_secs,
        }
    }
}

/// Why no action is being taken this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Failure count has not reached the threshold yet.
    BelowThreshold,
    /// An action ran too recently.
    Cooldown { remaining_secs: u64 },
}

/// Decision for one unhealthy cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPlan {
    Skip(SkipReason),
    Act(RemedialAction),
}

impl EscalationPolicy {
    /// Decide the next step given an already-incremented failure count.
    ///
    /// `state.consecutive_failures` must reflect the current (failed)
    /// check; `now` is epoch seconds.
    #[must_use]
    pub fn next_action(&self, state: &WatchdogState, now: u64) -> ActionPlan {
        let n = state.consecutive_failures;
        if n < self.fail_threshold {
            return ActionPlan::Skip(SkipReason::BelowThreshold);
        }

        if let Some(last_at) = state.last_action_at {
            let elapsed = now.saturating_sub(last_at);
            if elapsed < self.cooldown_secs {
                return ActionPlan::Skip(SkipReason::Cooldown {
                    remaining_secs: self.cooldown_secs - elapsed,
                });
            }
        }

        // Restart first, always. Rollback only once restart has been tried
        // and failures keep accumulating past double the threshold.
        if state.last_action != RemedialAction::Restart || n < self.fail_threshold * 2 {
            ActionPlan::Act(RemedialAction::Restart)
        } else {
            ActionPlan::Act(RemedialAction::Rollback)
        }
    }
}
