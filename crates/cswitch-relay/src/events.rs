//! Best-effort request-lifecycle event publication. Subscribers (a
//! broadcast channel plus pluggable sinks) may be absent; emitting never
//! blocks the forward path.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use cswitch_common::Family;

#[derive(Debug, Clone)]
pub struct RelayEvent {
    /// `llm.request.{family}` or `llm.response.{family}`.
    pub subject: String,
    pub payload: JsonValue,
}

impl RelayEvent {
    pub fn request(family: Family, trace_id: &str, model: Option<&str>, stream: bool) -> Self {
        Self {
            subject: format!("llm.request.{family}"),
            payload: serde_json::json!({
                "trace_id": trace_id,
                "model": model,
                "stream": stream,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn response(
        family: Family,
        trace_id: &str,
        provider: Option<&str>,
        model: Option<&str>,
        status: u16,
        input_tokens: i64,
        output_tokens: i64,
        total_cost: f64,
        duration_secs: f64,
    ) -> Self {
        Self {
            subject: format!("llm.response.{family}"),
            payload: serde_json::json!({
                "trace_id": trace_id,
                "provider": provider,
                "model": model,
                "status": status,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "total_cost": total_cost,
                "duration_secs": duration_secs,
            }),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn write<'a>(&'a self, event: &'a RelayEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<RelayEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.inner.tx.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut sinks) = self.inner.sinks.write() {
            sinks.push(sink);
        }
    }

    /// Fire-and-forget: an unsubscribed channel drops the event, sink
    /// writes run on their own tasks.
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = match self.inner.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => return,
        };
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                sink.write(&event).await;
            });
        }
    }
}
