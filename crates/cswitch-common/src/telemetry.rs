use time::OffsetDateTime;

use crate::{ErrorKind, Family};

/// One row for the request log, fully computed by the producer (costs
/// included) before it is queued.
#[derive(Debug, Clone)]
pub struct RequestLogEvent {
    pub trace_id: String,
    pub request_id: Option<String>,
    pub family: Family,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub http_status: i32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub stream: bool,
    pub duration_secs: f64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_create_cost: f64,
    pub cache_read_cost: f64,
    pub cache_5m_cost: f64,
    pub cache_1h_cost: f64,
    pub total_cost: f64,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub method: String,
    pub path: String,
    pub error_type: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub provider_error_code: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Optional request/response body capture, TTL-bound.
#[derive(Debug, Clone)]
pub struct BodyLogEvent {
    pub trace_id: String,
    pub request_body: String,
    pub response_body: String,
    pub body_size_bytes: i64,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Non-blocking handoff into the telemetry pipeline. Implementations must
/// never suspend the caller; dropping under pressure is permitted.
pub trait TelemetrySink: Send + Sync {
    fn record_request(&self, event: RequestLogEvent);
    fn record_body(&self, event: BodyLogEvent);
}

pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record_request(&self, _event: RequestLogEvent) {}
    fn record_body(&self, _event: BodyLogEvent) {}
}
