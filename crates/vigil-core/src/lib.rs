//! vigil-core: Core library for vigil
//!
//! This crate provides the core functionality for `vigil`, a watchdog and
//! upgrade guard for a single long-running agent service.
//!
//! # Architecture
//!
//! ```text
//! HealthProbe ──▶ FailureEscalator ──▶ RecoveryActuator ──▶ StateStore
//!      │                                     │
//!      └── resource sampling                 └── SnapshotStore ◀── UpgradePipeline
//! ```
//!
//! # Modules
//!
//! - `watchdog`: one check cycle (probe → escalate → act → persist)
//! - `probe`: liveness checks and resource sampling
//! - `metrics`: bounded metric log and growth trend detection
//! - `state`: durable watchdog state record
//! - `events`: append-only event log
//! - `escalate`: failure-escalation decisions
//! - `recover`: restart / rollback actuation
//! - `snapshot`: point-in-time system state capture
//! - `upgrade`: preflight → snapshot → apply → verify pipeline
//! - `git`, `pkg`, `service`: external capability interfaces (shell-outs)
//! - `service_config`: shallow view of the managed service's own config
//! - `notify`: cooldown-gated alert delivery
//! - `schedule`: host-scheduler timer registration
//! - `config`: environment-driven settings
//! - `exec`: bounded subprocess execution
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod escalate;
pub mod events;
pub mod exec;
pub mod git;
pub mod metrics;
pub mod notify;
pub mod pkg;
pub mod probe;
pub mod recover;
pub mod schedule;
pub mod service;
pub mod service_config;
pub mod snapshot;
pub mod state;
pub mod upgrade;
pub mod watchdog;

pub use error::{Error, Result};

/// Boxed future used by the capability traits so they stay object-safe.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Version of the vigil-core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
