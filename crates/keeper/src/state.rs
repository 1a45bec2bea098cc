//! Session state model.
//!
//! One `SessionState` instance exists per process, owned by the orchestrator
//! actor; everything else sees cloned snapshots. The persisted document
//! wraps the session fields together with the pause flag and the encrypted
//! credential blob so the whole thing rehydrates atomically at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Checking,
    Connected,
    NeedsLogin,
    Error,
    NetworkDown,
}

/// Snapshot of the keeper's view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Human-readable description of the last failure; cleared whenever the
    /// status returns to idle or connected.
    pub last_error: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    /// The session must be renewed at or after this instant. Always derived
    /// from `last_login_at` plus the session lifetime minus the renewal
    /// margin; the two fields only change together.
    pub next_renew_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
    /// Consecutive failures since the last success. Never exceeds the length
    /// of the backoff schedule.
    pub retry_count: u32,
}

impl SessionState {
    pub fn renewal_due(&self, now: DateTime<Utc>) -> bool {
        self.next_renew_at.is_some_and(|deadline| now >= deadline)
    }

    /// Record a successful login and derive the renewal deadline in the same
    /// mutation, keeping the `last_login_at`/`next_renew_at` pair coherent.
    pub fn record_login_success(
        &mut self,
        now: DateTime<Utc>,
        session_timeout: Duration,
        renew_margin: Duration,
    ) {
        let lifetime = session_timeout.saturating_sub(renew_margin);
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::zero());
        self.status = SessionStatus::Connected;
        self.is_connected = true;
        self.last_error = None;
        self.last_login_at = Some(now);
        self.next_renew_at = Some(now + lifetime);
        self.retry_count = 0;
    }

    /// Record a probe that confirmed connectivity without a fresh login. The
    /// renewal deadline is left alone; only the last login defines it.
    pub fn record_probe_success(&mut self) {
        self.status = SessionStatus::Connected;
        self.is_connected = true;
        self.last_error = None;
        self.retry_count = 0;
    }
}

/// The durable document: session fields plus the pause flag and the opaque
/// encrypted credential blob, all under one key in the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(flatten)]
    pub session: SessionState,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub encrypted_credentials: Option<String>,
}
