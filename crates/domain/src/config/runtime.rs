use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hard cap on `event_page_limit`, regardless of configuration.
pub const EVENT_PAGE_CAP: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum count of non-idle agent loop workers.
    #[serde(default = "d_max_parallel")]
    pub max_parallel_missions: usize,

    /// Per-turn iteration budget; overrun transitions the mission to `blocked`.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: usize,

    /// Per-subscription in-flight buffer before lag catch-up kicks in.
    #[serde(default = "d_subscription_buffer")]
    pub subscription_buffer: usize,

    #[serde(default = "d_stall_warn")]
    pub stall_warn_seconds: u64,

    #[serde(default = "d_stall_severe")]
    pub stall_severe_seconds: u64,

    /// Stall detector tick interval.
    #[serde(default = "d_stall_tick")]
    pub stall_tick_seconds: u64,

    /// Default page size for event reads (capped at [`EVENT_PAGE_CAP`]).
    #[serde(default = "d_event_page_limit")]
    pub event_page_limit: usize,

    /// Keepalive interval for quiet subscriptions.
    #[serde(default = "d_keepalive")]
    pub keepalive_seconds: u64,

    /// Per-mission queue cap. `0` means unbounded.
    #[serde(default)]
    pub queue_cap: usize,
}

impl RuntimeConfig {
    /// The configured page limit, clamped to the hard cap.
    pub fn effective_page_limit(&self) -> usize {
        self.event_page_limit.min(EVENT_PAGE_CAP).max(1)
    }

    /// Clamp a caller-supplied limit to the configured default and cap.
    pub fn clamp_read_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(EVENT_PAGE_CAP),
            _ => self.effective_page_limit(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_missions: d_max_parallel(),
            max_iterations: d_max_iterations(),
            subscription_buffer: d_subscription_buffer(),
            stall_warn_seconds: d_stall_warn(),
            stall_severe_seconds: d_stall_severe(),
            stall_tick_seconds: d_stall_tick(),
            event_page_limit: d_event_page_limit(),
            keepalive_seconds: d_keepalive(),
            queue_cap: 0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_parallel() -> usize {
    3
}
fn d_max_iterations() -> usize {
    50
}
fn d_subscription_buffer() -> usize {
    256
}
fn d_stall_warn() -> u64 {
    60
}
fn d_stall_severe() -> u64 {
    180
}
fn d_stall_tick() -> u64 {
    5
}
fn d_event_page_limit() -> usize {
    1000
}
fn d_keepalive() -> u64 {
    15
}
