//! Batched telemetry pipeline: bounded queues feeding single-writer
//! tasks, so the request path never takes a DB lock.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time as tokio_time;
use tracing::{debug, warn};

use cswitch_common::{BodyLogEvent, HealthSnapshot, RequestLogEvent};

use crate::store::RelayStore;

#[derive(Debug, Clone)]
pub struct TelemetryBusConfig {
    pub request_capacity: usize,
    pub body_capacity: usize,
    pub health_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for TelemetryBusConfig {
    fn default() -> Self {
        Self {
            request_capacity: 1000,
            body_capacity: 1000,
            health_capacity: 1024,
            batch_size: 10,
            flush_interval: Duration::from_millis(100),
            retry_delay: Duration::from_millis(100),
        }
    }
}

pub struct TelemetryBus {
    pub request_tx: mpsc::Sender<RequestLogEvent>,
    pub body_tx: mpsc::Sender<BodyLogEvent>,
    pub health_tx: mpsc::Sender<HealthSnapshot>,
    handles: Vec<JoinHandle<()>>,
}

impl TelemetryBus {
    pub fn spawn(store: RelayStore, config: TelemetryBusConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.request_capacity);
        let (body_tx, body_rx) = mpsc::channel(config.body_capacity);
        let (health_tx, health_rx) = mpsc::channel(config.health_capacity);

        let handles = vec![
            tokio::spawn(request_writer(store.clone(), request_rx, config.clone())),
            tokio::spawn(body_writer(store.clone(), body_rx, config.clone())),
            tokio::spawn(health_writer(store, health_rx)),
        ];

        Self {
            request_tx,
            body_tx,
            health_tx,
            handles,
        }
    }

    /// Close the queues and wait for the writers to drain, bounded by
    /// `grace`. Anything still unflushed after the grace window is lost.
    pub async fn shutdown(self, grace: Duration) {
        let TelemetryBus {
            request_tx,
            body_tx,
            health_tx,
            handles,
        } = self;
        drop(request_tx);
        drop(body_tx);
        drop(health_tx);
        for handle in handles {
            if tokio_time::timeout(grace, handle).await.is_err() {
                warn!(event = "telemetry_drain_timeout");
            }
        }
    }
}

/// Collect one batch: the first item, then more until `batch_size` items
/// are buffered or `flush_interval` has passed since the first one.
/// Returns `None` once the channel is closed and empty.
async fn next_batch<T>(
    rx: &mut mpsc::Receiver<T>,
    batch_size: usize,
    flush_interval: Duration,
) -> Option<Vec<T>> {
    let first = rx.recv().await?;
    let mut batch = Vec::with_capacity(batch_size);
    batch.push(first);

    let deadline = tokio_time::sleep(flush_interval);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => {
                    batch.push(item);
                    if batch.len() >= batch_size {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut deadline => break,
        }
    }
    Some(batch)
}

async fn request_writer(
    store: RelayStore,
    mut rx: mpsc::Receiver<RequestLogEvent>,
    config: TelemetryBusConfig,
) {
    while let Some(batch) =
        next_batch(&mut rx, config.batch_size, config.flush_interval).await
    {
        flush(
            "request_log",
            || store.insert_request_logs(&batch),
            config.retry_delay,
        )
        .await;
    }
    debug!(event = "request_writer_stopped");
}

async fn body_writer(
    store: RelayStore,
    mut rx: mpsc::Receiver<BodyLogEvent>,
    config: TelemetryBusConfig,
) {
    while let Some(batch) =
        next_batch(&mut rx, config.batch_size, config.flush_interval).await
    {
        flush(
            "request_log_body",
            || store.insert_body_logs(&batch),
            config.retry_delay,
        )
        .await;
    }
    debug!(event = "body_writer_stopped");
}

async fn health_writer(store: RelayStore, mut rx: mpsc::Receiver<HealthSnapshot>) {
    while let Some(snapshot) = rx.recv().await {
        if let Err(err) = store.upsert_health(&snapshot).await {
            warn!(event = "health_write_failed", provider_id = snapshot.provider_id, error = %err);
        }
    }
    debug!(event = "health_writer_stopped");
}

/// One retry, then the batch is dropped; telemetry is allowed to lose
/// records under sustained write failure.
async fn flush<F, Fut, E>(table: &'static str, mut write: F, retry_delay: Duration)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    if write().await.is_ok() {
        return;
    }
    tokio_time::sleep(retry_delay).await;
    if let Err(err) = write().await {
        warn!(event = "telemetry_batch_dropped", table, error = %err);
    }
}

/// Periodic TTL sweep for captured bodies.
pub fn spawn_body_sweeper(store: RelayStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio_time::interval(every);
        ticker.set_missed_tick_behavior(tokio_time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep_expired_bodies(OffsetDateTime::now_utc()).await {
                Ok(0) => {}
                Ok(count) => debug!(event = "body_log_swept", count),
                Err(err) => warn!(event = "body_sweep_failed", error = %err),
            }
        }
    })
}
