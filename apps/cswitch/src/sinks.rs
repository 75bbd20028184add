use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use cswitch_common::{BodyLogEvent, HealthSink, HealthSnapshot, RequestLogEvent, TelemetrySink};
use cswitch_relay::{EventSink, RelayEvent};
use cswitch_storage::TelemetryBus;

/// Bridges relay telemetry onto the storage bus. `try_send` keeps the
/// request path non-blocking; a full queue drops the record and counts
/// the loss.
pub(crate) struct BusTelemetrySink {
    request_tx: tokio::sync::mpsc::Sender<RequestLogEvent>,
    body_tx: tokio::sync::mpsc::Sender<BodyLogEvent>,
    dropped: AtomicU64,
}

impl BusTelemetrySink {
    pub(crate) fn new(bus: &TelemetryBus) -> Self {
        Self {
            request_tx: bus.request_tx.clone(),
            body_tx: bus.body_tx.clone(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Total records lost to a full queue, reported at shutdown.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for BusTelemetrySink {
    fn record_request(&self, event: RequestLogEvent) {
        if self.request_tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(event = "telemetry_overflow", dropped_total = total);
        }
    }

    fn record_body(&self, event: BodyLogEvent) {
        if self.body_tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(event = "telemetry_overflow", dropped_total = total);
        }
    }
}

pub(crate) struct BusHealthSink {
    health_tx: tokio::sync::mpsc::Sender<HealthSnapshot>,
}

impl BusHealthSink {
    pub(crate) fn new(bus: &TelemetryBus) -> Self {
        Self {
            health_tx: bus.health_tx.clone(),
        }
    }
}

impl HealthSink for BusHealthSink {
    fn submit(&self, snapshot: HealthSnapshot) {
        let _ = self.health_tx.try_send(snapshot);
    }
}

/// Best-effort stderr mirror for relay events, one JSON line each.
pub(crate) struct StderrEventSink;

impl EventSink for StderrEventSink {
    fn write<'a>(&'a self, event: &'a RelayEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let line = serde_json::json!({
                "subject": event.subject,
                "payload": event.payload,
            });
            eprintln!("{line}");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cswitch_common::Family;
    use cswitch_storage::{LogFilter, RelayStore, TelemetryBus, TelemetryBusConfig};
    use sea_orm::{ConnectOptions, Database};
    use time::OffsetDateTime;

    fn log_event(n: usize) -> RequestLogEvent {
        RequestLogEvent {
            trace_id: format!("trace-{n}"),
            request_id: None,
            family: Family::Claude,
            model: Some("claude-sonnet-4".to_string()),
            provider: Some("main".to_string()),
            http_status: 200,
            input_tokens: 1,
            output_tokens: 1,
            cache_create_tokens: 0,
            cache_read_tokens: 0,
            reasoning_tokens: 0,
            stream: false,
            duration_secs: 0.1,
            input_cost: 0.0,
            output_cost: 0.0,
            cache_create_cost: 0.0,
            cache_read_cost: 0.0,
            cache_5m_cost: 0.0,
            cache_1h_cost: 0.0,
            total_cost: 0.0,
            user_agent: None,
            client_ip: None,
            user_id: None,
            method: "POST".to_string(),
            path: "/v1/messages".to_string(),
            error_type: None,
            error_message: None,
            provider_error_code: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn overflow_past_capacity_is_counted_exactly() {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        let store = RelayStore::from_connection(db);
        store.sync().await.unwrap();

        let capacity = 4;
        let bus = TelemetryBus::spawn(
            store.clone(),
            TelemetryBusConfig {
                request_capacity: capacity,
                ..Default::default()
            },
        );
        let sink = BusTelemetrySink::new(&bus);

        // On the single-threaded test runtime the writer task cannot run
        // between these synchronous sends, so everything past the channel
        // capacity must drop.
        let total = 10;
        for n in 0..total {
            sink.record_request(log_event(n));
        }
        assert_eq!(sink.dropped(), (total - capacity) as u64);

        bus.shutdown(Duration::from_secs(5)).await;
        let page = store
            .query_logs(LogFilter {
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        // Exactly (N - persisted) were reported via the overflow counter.
        assert_eq!(page.rows.len(), capacity);
        assert_eq!(sink.dropped() as usize, total - page.rows.len());
    }

    #[tokio::test]
    async fn within_capacity_nothing_is_dropped() {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        let store = RelayStore::from_connection(db);
        store.sync().await.unwrap();

        let bus = TelemetryBus::spawn(store.clone(), TelemetryBusConfig::default());
        let sink = BusTelemetrySink::new(&bus);
        for n in 0..25 {
            sink.record_request(log_event(n));
        }
        assert_eq!(sink.dropped(), 0);

        bus.shutdown(Duration::from_secs(5)).await;
        let page = store
            .query_logs(LogFilter {
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 25);
    }
}
