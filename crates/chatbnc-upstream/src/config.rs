//! Session configuration and link state machine.

use std::time::Duration;

use rand::Rng;

use crate::LogPolicy;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings shared by every upstream session in a pool.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Account the managed characters belong to.
    pub account: String,

    /// Client name and version sent in the upstream `IDN` and shown in
    /// the welcome notice.
    pub client_name: String,
    pub client_version: String,

    /// Maximum replay buffer length in frames. 0 means unbounded.
    pub replay_limit: usize,

    /// How long a cached `CHA` / `ORS` listing may answer clients locally.
    pub channel_list_max_age: Duration,

    /// Reconnect backoff: `min(base * 2^attempt, max)` plus jitter.
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,

    /// How long the service gets to acknowledge our `IDN` before the
    /// connection is dropped and retried.
    pub login_timeout: Duration,

    pub log_policy: LogPolicy,

    /// Log every frame crossing the session at `debug`.
    pub trace_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            client_name: "chatbnc".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
            replay_limit: 1000,
            channel_list_max_age: Duration::from_secs(60),
            reconnect_base: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(120),
            login_timeout: Duration::from_secs(30),
            log_policy: LogPolicy::default(),
            trace_frames: false,
        }
    }
}

impl SessionConfig {
    /// The `HLO` text sent in every snapshot.
    pub fn welcome(&self) -> String {
        format!(
            "Welcome. Running {} ({}). Enjoy your stay.",
            self.client_name, self.client_version
        )
    }

    /// Backoff before reconnect attempt `attempt` (0-based), without
    /// jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.reconnect_base
            .saturating_mul(factor)
            .min(self.reconnect_max)
    }

    /// [`backoff`](Self::backoff) plus up to a quarter of it in random
    /// jitter, so sessions that dropped together don't retry together.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let spread = (base.as_millis() / 4) as u64;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

// ---------------------------------------------------------------------------
// LinkState
// ---------------------------------------------------------------------------

/// State of a session's upstream connection.
///
/// ```text
/// Connecting ──(upstream IDN)──→ Connected
///     ↑                              │
///     └──(backoff)── Closed ←──(socket closed / failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting out a backoff, fetching a ticket, dialing, or waiting for
    /// the service to acknowledge our `IDN`.
    Connecting,
    /// Identified upstream. Clients attach immediately.
    Connected,
    /// The connection just dropped.
    Closed,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
