//! Per-provider circuit breaker.
//!
//! The in-memory breaker is authoritative for a process lifetime; every
//! transition is written through asynchronously as a full health-row
//! image. An open breaker whose recovery window has elapsed turns
//! half-open lazily on the next `allow_request`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::info;

use cswitch_common::{BreakerSettings, CircuitState, HealthSink, HealthSnapshot, NoopHealthSink};

const LATENCY_EWMA_ALPHA: f64 = 0.2;

#[derive(Debug)]
struct Core {
    state: CircuitState,
    consecutive_fails: u32,
    consecutive_successes: u32,
    probe_in_flight: bool,
    total_requests: i64,
    total_failures: i64,
    avg_latency_ms: f64,
    last_success_at: Option<OffsetDateTime>,
    last_failure_at: Option<OffsetDateTime>,
    circuit_opened_at: Option<OffsetDateTime>,
}

impl Core {
    fn fresh() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_fails: 0,
            consecutive_successes: 0,
            probe_in_flight: false,
            total_requests: 0,
            total_failures: 0,
            avg_latency_ms: 0.0,
            last_success_at: None,
            last_failure_at: None,
            circuit_opened_at: None,
        }
    }
}

pub struct Breaker {
    provider_id: i64,
    settings: Mutex<BreakerSettings>,
    core: Mutex<Core>,
    sink: Arc<dyn HealthSink>,
}

impl Breaker {
    pub fn new(provider_id: i64, settings: BreakerSettings, sink: Arc<dyn HealthSink>) -> Self {
        Self {
            provider_id,
            settings: Mutex::new(settings),
            core: Mutex::new(Core::fresh()),
            sink,
        }
    }

    pub fn from_snapshot(snapshot: &HealthSnapshot, sink: Arc<dyn HealthSink>) -> Self {
        let breaker = Self::new(snapshot.provider_id, snapshot.settings(), sink);
        {
            let mut core = breaker.core.lock().expect("breaker lock");
            core.state = snapshot.state;
            core.consecutive_fails = snapshot.consecutive_fails;
            core.total_requests = snapshot.total_requests;
            core.total_failures = snapshot.total_failures;
            core.avg_latency_ms = snapshot.avg_latency_ms;
            core.last_success_at = snapshot.last_success_at;
            core.last_failure_at = snapshot.last_failure_at;
            core.circuit_opened_at = snapshot.circuit_opened_at;
        }
        breaker
    }

    pub fn provider_id(&self) -> i64 {
        self.provider_id
    }

    pub fn settings(&self) -> BreakerSettings {
        *self.settings.lock().expect("breaker settings lock")
    }

    pub fn configure(&self, settings: BreakerSettings) {
        *self.settings.lock().expect("breaker settings lock") = settings;
        self.write_through();
    }

    /// Open, and the recovery window has not yet elapsed. Read-only; used
    /// by the selector to exclude candidates without side effects.
    pub fn is_blocking(&self) -> bool {
        let settings = self.settings();
        let core = self.core.lock().expect("breaker lock");
        core.state == CircuitState::Open
            && !recovery_elapsed(core.circuit_opened_at, settings.recovery_timeout)
    }

    /// Admission check. Admitted requests count toward `total_requests`;
    /// a half-open denial does not.
    pub fn allow_request(&self) -> bool {
        let settings = self.settings();
        let admitted = {
            let mut core = self.core.lock().expect("breaker lock");
            match core.state {
                CircuitState::Closed => {
                    core.total_requests += 1;
                    true
                }
                CircuitState::Open => {
                    if recovery_elapsed(core.circuit_opened_at, settings.recovery_timeout) {
                        core.state = CircuitState::HalfOpen;
                        core.consecutive_successes = 0;
                        core.probe_in_flight = true;
                        core.total_requests += 1;
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    if core.probe_in_flight {
                        false
                    } else {
                        core.probe_in_flight = true;
                        core.total_requests += 1;
                        true
                    }
                }
            }
        };
        if admitted {
            self.write_through();
        }
        admitted
    }

    pub fn on_success(&self, latency: Duration) {
        let settings = self.settings();
        let closed_now = {
            let mut core = self.core.lock().expect("breaker lock");
            let now = OffsetDateTime::now_utc();
            core.probe_in_flight = false;
            core.last_success_at = Some(now);
            let latency_ms = latency.as_secs_f64() * 1000.0;
            core.avg_latency_ms = if core.avg_latency_ms == 0.0 {
                latency_ms
            } else {
                core.avg_latency_ms * (1.0 - LATENCY_EWMA_ALPHA) + latency_ms * LATENCY_EWMA_ALPHA
            };
            match core.state {
                CircuitState::Closed => {
                    core.consecutive_fails = 0;
                    false
                }
                CircuitState::HalfOpen => {
                    core.consecutive_successes += 1;
                    if core.consecutive_successes >= settings.success_threshold {
                        core.state = CircuitState::Closed;
                        core.circuit_opened_at = None;
                        core.consecutive_fails = 0;
                        true
                    } else {
                        false
                    }
                }
                CircuitState::Open => {
                    core.consecutive_fails = 0;
                    false
                }
            }
        };
        if closed_now {
            info!(event = "breaker_closed", provider_id = self.provider_id);
        }
        self.write_through();
    }

    pub fn on_failure(&self) {
        let settings = self.settings();
        let opened_now = {
            let mut core = self.core.lock().expect("breaker lock");
            let now = OffsetDateTime::now_utc();
            core.probe_in_flight = false;
            core.total_failures += 1;
            core.last_failure_at = Some(now);
            core.consecutive_fails += 1;
            match core.state {
                CircuitState::Closed => {
                    if core.consecutive_fails >= settings.fail_threshold {
                        core.state = CircuitState::Open;
                        core.circuit_opened_at = Some(now);
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    core.state = CircuitState::Open;
                    core.circuit_opened_at = Some(now);
                    true
                }
                CircuitState::Open => false,
            }
        };
        if opened_now {
            info!(event = "breaker_opened", provider_id = self.provider_id);
        }
        self.write_through();
    }

    /// Manual reset back to closed with zeroed counters.
    pub fn reset(&self) {
        {
            let mut core = self.core.lock().expect("breaker lock");
            *core = Core::fresh();
        }
        self.write_through();
    }

    pub fn metrics(&self) -> HealthSnapshot {
        let settings = self.settings();
        let core = self.core.lock().expect("breaker lock");
        let success_rate = if core.total_requests > 0 {
            1.0 - core.total_failures as f64 / core.total_requests as f64
        } else {
            1.0
        };
        HealthSnapshot {
            provider_id: self.provider_id,
            state: core.state,
            consecutive_fails: core.consecutive_fails,
            fail_threshold: settings.fail_threshold,
            recovery_timeout_sec: settings.recovery_timeout.as_secs(),
            success_threshold: settings.success_threshold,
            total_requests: core.total_requests,
            total_failures: core.total_failures,
            success_rate,
            avg_latency_ms: core.avg_latency_ms,
            last_success_at: core.last_success_at,
            last_failure_at: core.last_failure_at,
            circuit_opened_at: core.circuit_opened_at,
        }
    }

    fn write_through(&self) {
        self.sink.submit(self.metrics());
    }
}

fn recovery_elapsed(opened_at: Option<OffsetDateTime>, window: Duration) -> bool {
    match opened_at {
        Some(at) => OffsetDateTime::now_utc() - at >= window,
        None => true,
    }
}

/// Breakers indexed by provider id, created lazily on first use and
/// evicted when the provider is dropped.
pub struct BreakerManager {
    defaults: BreakerSettings,
    sink: Arc<dyn HealthSink>,
    cells: Mutex<HashMap<i64, Arc<Breaker>>>,
}

impl BreakerManager {
    pub fn new(defaults: BreakerSettings, sink: Arc<dyn HealthSink>) -> Self {
        Self {
            defaults,
            sink,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_noop_sink() -> Self {
        Self::new(BreakerSettings::default(), Arc::new(NoopHealthSink))
    }

    pub fn get(&self, provider_id: i64) -> Arc<Breaker> {
        let mut cells = self.cells.lock().expect("breaker manager lock");
        cells
            .entry(provider_id)
            .or_insert_with(|| {
                Arc::new(Breaker::new(provider_id, self.defaults, self.sink.clone()))
            })
            .clone()
    }

    /// Seed breakers from persisted health rows at startup.
    pub fn rehydrate(&self, snapshots: &[HealthSnapshot]) {
        let mut cells = self.cells.lock().expect("breaker manager lock");
        for snapshot in snapshots {
            cells.insert(
                snapshot.provider_id,
                Arc::new(Breaker::from_snapshot(snapshot, self.sink.clone())),
            );
        }
    }

    pub fn evict(&self, provider_id: i64) {
        self.cells
            .lock()
            .expect("breaker manager lock")
            .remove(&provider_id);
    }

    pub fn reset(&self, provider_id: i64) {
        self.get(provider_id).reset();
    }

    pub fn metrics_all(&self) -> Vec<HealthSnapshot> {
        let cells = self.cells.lock().expect("breaker manager lock");
        let mut rows: Vec<HealthSnapshot> =
            cells.values().map(|breaker| breaker.metrics()).collect();
        rows.sort_by_key(|row| row.provider_id);
        rows
    }
}
