use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub fn parse(value: &str) -> Option<CircuitState> {
        match value {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half_open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub fail_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Full health row image, written through after every transition and used
/// to rehydrate breakers at startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub provider_id: i64,
    pub state: CircuitState,
    pub consecutive_fails: u32,
    pub fail_threshold: u32,
    pub recovery_timeout_sec: u64,
    pub success_threshold: u32,
    pub total_requests: i64,
    pub total_failures: i64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub circuit_opened_at: Option<OffsetDateTime>,
}

impl HealthSnapshot {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            fail_threshold: self.fail_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_sec),
            success_threshold: self.success_threshold,
        }
    }
}

/// Asynchronous write-through for health rows; must not block the caller.
pub trait HealthSink: Send + Sync {
    fn submit(&self, snapshot: HealthSnapshot);
}

pub struct NoopHealthSink;

impl HealthSink for NoopHealthSink {
    fn submit(&self, _snapshot: HealthSnapshot) {}
}
