//! Health and transport status types shared across the MCP client stack.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Consecutive probe failures required to move a server from `Degraded` to `Unhealthy`.
pub const UNHEALTHY_THRESHOLD: u32 = 3;

/// Lifecycle state of a server's health, as tracked by the Health Monitor.
///
/// Transitions (`spec.md` §4.4):
/// `unknown -> healthy` on first success, `healthy -> degraded` on a single failure,
/// `degraded -> unhealthy` once `failure_count >= UNHEALTHY_THRESHOLD`, and any state
/// `-> healthy` on the next success.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState::Unknown
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A server's current health cell: `{status, last_check, last_success, last_error, latency}`
/// per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub last_check: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
    pub latency_ms: Option<u64>,
    pub failure_count: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: HealthState::Unknown,
            last_check: None,
            last_success: None,
            last_error: None,
            latency_ms: None,
            failure_count: 0,
        }
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful probe. Always transitions to `Healthy`.
    pub fn record_success(&mut self, latency_ms: u64) {
        let now = SystemTime::now();
        self.status = HealthState::Healthy;
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.last_error = None;
        self.latency_ms = Some(latency_ms);
        self.failure_count = 0;
    }

    /// Record a failed probe, advancing the state machine by one step.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_check = Some(SystemTime::now());
        self.last_error = Some(error.into());
        self.failure_count += 1;
        self.status = match self.status {
            HealthState::Unknown | HealthState::Healthy => HealthState::Degraded,
            HealthState::Degraded if self.failure_count >= UNHEALTHY_THRESHOLD => HealthState::Unhealthy,
            other => other,
        };
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// A server is usable as a last resort when degraded but not when unhealthy.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, HealthState::Healthy | HealthState::Degraded)
    }

    pub fn time_since_last_check(&self) -> Option<Duration> {
        self.last_check.and_then(|t| t.elapsed().ok())
    }
}

/// Transport-level connectivity status, independent of the health probe state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

impl TransportStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportStatus::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_to_healthy_on_first_success() {
        let mut h = HealthStatus::new();
        assert_eq!(h.status, HealthState::Unknown);
        h.record_success(12);
        assert_eq!(h.status, HealthState::Healthy);
        assert_eq!(h.failure_count, 0);
    }

    #[test]
    fn healthy_degrades_on_single_failure_then_unhealthy_at_threshold() {
        let mut h = HealthStatus::new();
        h.record_success(5);
        h.record_failure("boom");
        assert_eq!(h.status, HealthState::Degraded);
        h.record_failure("boom");
        assert_eq!(h.status, HealthState::Degraded);
        h.record_failure("boom");
        assert_eq!(h.status, HealthState::Unhealthy);
        assert_eq!(h.failure_count, 3);
    }

    #[test]
    fn unhealthy_recovers_to_healthy_on_next_success() {
        let mut h = HealthStatus::new();
        for _ in 0..3 {
            h.record_failure("boom");
        }
        assert_eq!(h.status, HealthState::Unhealthy);
        h.record_success(8);
        assert_eq!(h.status, HealthState::Healthy);
        assert_eq!(h.failure_count, 0);
    }

    #[test]
    fn degraded_server_is_usable_unhealthy_is_not() {
        let mut h = HealthStatus::new();
        h.record_success(1);
        h.record_failure("x");
        assert!(h.is_usable());
        h.record_failure("x");
        h.record_failure("x");
        assert!(!h.is_usable());
    }
}
