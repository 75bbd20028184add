//! The relay pipeline: gate → selection → per-candidate breaker
//! admission → forward → accounting. Failover walks the candidate list;
//! a request never retries the same upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use cswitch_common::{ErrorKind, Family, RelayError, SchemaKind, TelemetrySink};
use cswitch_pricing::{CostBreakdown, PricingTable};
use cswitch_protocol::openai_chat::ChatCompletionResponse;
use cswitch_protocol::sse::SseDecoder;
use cswitch_protocol::usage::{extract_unary, StreamUsage, UsageReport};
use cswitch_transform::{convert_response, StreamConverter};

use crate::adapter::{self, PreparedCall};
use crate::breaker::{Breaker, BreakerManager};
use crate::events::{EventHub, RelayEvent};
use crate::forward::{Forwarder, UpstreamBody};
use crate::gate::AppGate;
use crate::registry::Registry;
use crate::route::RouteMatch;
use crate::select::{Candidate, Selector};

const BODY_CAPTURE_LIMIT: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub body_logging: bool,
    pub body_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            body_logging: false,
            body_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InboundMeta {
    pub method: String,
    pub path: String,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
}

pub enum RelayOutcome {
    Json {
        status: u16,
        content_type: String,
        body: Bytes,
        trace_id: String,
    },
    Stream {
        status: u16,
        content_type: String,
        rx: mpsc::Receiver<Bytes>,
        trace_id: String,
    },
}

pub struct RelayEngine {
    registry: Arc<Registry>,
    breakers: Arc<BreakerManager>,
    gate: Arc<AppGate>,
    selector: Selector,
    forwarder: Forwarder,
    pricing: Arc<PricingTable>,
    telemetry: Arc<dyn TelemetrySink>,
    events: EventHub,
    config: EngineConfig,
}

/// Per-request context shared by the finish paths.
struct Ctx<'a> {
    trace_id: String,
    family: Family,
    meta: &'a InboundMeta,
    model: Option<String>,
    stream: bool,
    started: Instant,
}

struct StreamJob {
    trace_id: String,
    family: Family,
    meta: InboundMeta,
    requested_model: String,
    upstream_model: String,
    provider: String,
    started: Instant,
    upstream_schema: SchemaKind,
    convert_back: bool,
    request_body: Bytes,
}

impl RelayEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        breakers: Arc<BreakerManager>,
        gate: Arc<AppGate>,
        selector: Selector,
        forwarder: Forwarder,
        pricing: Arc<PricingTable>,
        telemetry: Arc<dyn TelemetrySink>,
        events: EventHub,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            gate,
            selector,
            forwarder,
            pricing,
            telemetry,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<BreakerManager> {
        &self.breakers
    }

    pub fn gate(&self) -> &Arc<AppGate> {
        &self.gate
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Remove a provider and drop its breaker with it.
    pub async fn remove_provider(&self, id: i64) -> Result<(), crate::registry::RegistryError> {
        self.registry.delete(id).await?;
        self.breakers.evict(id);
        Ok(())
    }

    pub async fn handle(&self, route: RouteMatch, body: Bytes, meta: InboundMeta) -> RelayOutcome {
        let trace_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let request_meta = adapter::request_meta(&route, &body);
        let stream = request_meta.stream;
        let family = route.family;

        self.events.emit(RelayEvent::request(
            family,
            &trace_id,
            request_meta.model.as_deref(),
            stream,
        ));
        info!(
            event = "relay_received",
            trace_id = %trace_id,
            family = %family,
            model = ?request_meta.model,
            path = %meta.path,
            is_stream = stream
        );

        let ctx = Ctx {
            trace_id,
            family,
            meta: &meta,
            model: request_meta.model.clone(),
            stream,
            started,
        };

        if !self.gate.allow(family) {
            let error = RelayError::new(
                ErrorKind::ProxyDisabled,
                format!("proxy disabled for {family}"),
            );
            return self.finish_error(ctx, error, None);
        }
        self.gate.note_request(family);

        let Some(model) = request_meta.model else {
            let error = RelayError::new(ErrorKind::ConfigInvalid, "missing model in request");
            return self.finish_error(ctx, error, None);
        };

        let snapshot = self.registry.snapshot();
        let candidates = match self
            .selector
            .candidates(&snapshot, family, &model, &self.breakers)
        {
            Ok(candidates) => candidates,
            Err(first_err) => {
                // `/v1/chat/completions` falls back to the codex pool
                // when no generic provider is configured at all.
                let fallback = route.fallback_family.and_then(|fallback| {
                    (first_err.kind == ErrorKind::NoProviderConfigured)
                        .then(|| {
                            self.selector
                                .candidates(&snapshot, fallback, &model, &self.breakers)
                                .ok()
                        })
                        .flatten()
                });
                match fallback {
                    Some(candidates) => candidates,
                    None => return self.finish_error(ctx, first_err, None),
                }
            }
        };

        self.run_candidates(ctx, &route, body, model, candidates).await
    }

    async fn run_candidates(
        &self,
        ctx: Ctx<'_>,
        route: &RouteMatch,
        body: Bytes,
        model: String,
        candidates: Vec<Candidate>,
    ) -> RelayOutcome {
        let stream = ctx.stream;
        let mut last_5xx: Option<(u16, Bytes, String)> = None;
        let mut last_transport: Option<(String, String)> = None;

        for candidate in candidates {
            let prepared = match adapter::prepare(route, &candidate, &body, stream) {
                Ok(prepared) => prepared,
                Err(error) => return self.finish_error(ctx, error, None),
            };

            let breaker = self.breakers.get(candidate.provider.id);
            if !breaker.allow_request() {
                continue;
            }
            let provider_name = candidate.provider.name.clone();

            let attempt = self
                .forwarder
                .send(
                    &candidate.provider.api_url,
                    &candidate.provider.api_key,
                    &prepared,
                    stream,
                )
                .await;

            let reply = match attempt {
                Err(transport) => {
                    breaker.on_failure();
                    warn!(
                        event = "upstream_transport_error",
                        trace_id = %ctx.trace_id,
                        provider = %provider_name,
                        error = %transport
                    );
                    last_transport = Some((transport.message, provider_name));
                    continue;
                }
                Ok(reply) => reply,
            };

            if (400..500).contains(&reply.status) {
                // Client-class upstream errors pass through untouched and
                // do not advance the breaker or the candidate list.
                let UpstreamBody::Bytes(reply_body) = reply.body else {
                    unreachable!("non-2xx replies are fully buffered");
                };
                return self.finish_upstream_4xx(
                    ctx,
                    reply.status,
                    reply.content_type,
                    reply_body,
                    provider_name,
                    body,
                );
            }

            if !(200..300).contains(&reply.status) {
                breaker.on_failure();
                let UpstreamBody::Bytes(reply_body) = reply.body else {
                    unreachable!("non-2xx replies are fully buffered");
                };
                warn!(
                    event = "upstream_http_error",
                    trace_id = %ctx.trace_id,
                    provider = %provider_name,
                    status = reply.status
                );
                last_5xx = Some((reply.status, reply_body, provider_name));
                continue;
            }

            let reply_status = reply.status;
            match reply.body {
                UpstreamBody::Bytes(reply_body) => {
                    return self.finish_unary(
                        ctx,
                        reply_status,
                        &candidate,
                        &breaker,
                        &prepared,
                        reply_body,
                        provider_name,
                        body,
                        &model,
                    );
                }
                UpstreamBody::Stream(upstream_rx) => {
                    return self.spawn_stream(
                        StreamJob {
                            trace_id: ctx.trace_id,
                            family: ctx.family,
                            meta: ctx.meta.clone(),
                            requested_model: model,
                            upstream_model: candidate.upstream_model.clone(),
                            provider: provider_name,
                            started: ctx.started,
                            upstream_schema: prepared.upstream_schema,
                            convert_back: prepared.convert_back,
                            request_body: body,
                        },
                        reply_status,
                        reply.content_type,
                        upstream_rx,
                        breaker,
                    );
                }
            }
        }

        // Every candidate either failed retryably or was denied admission.
        if let Some((status, reply_body, provider)) = last_5xx {
            let code = provider_error_code(&reply_body);
            self.record(
                &ctx,
                502,
                Some(provider),
                UsageReport::default(),
                Some((
                    ErrorKind::UpstreamHttp5xx,
                    format!("upstream returned {status}"),
                )),
                code,
            );
            return RelayOutcome::Json {
                status: 502,
                content_type: "application/json".to_string(),
                body: reply_body,
                trace_id: ctx.trace_id,
            };
        }
        if let Some((message, provider)) = last_transport {
            let error = RelayError::new(ErrorKind::UpstreamTransport, message);
            return self.finish_error(ctx, error, Some(provider));
        }
        let error = RelayError::new(
            ErrorKind::NoHealthyProvider,
            "all candidates rejected the request",
        );
        self.finish_error(ctx, error, None)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_unary(
        &self,
        ctx: Ctx<'_>,
        status: u16,
        candidate: &Candidate,
        breaker: &Arc<Breaker>,
        prepared: &PreparedCall,
        reply_body: Bytes,
        provider: String,
        request_body: Bytes,
        requested_model: &str,
    ) -> RelayOutcome {
        let usage = extract_unary(prepared.upstream_schema, &reply_body);

        let client_body = if prepared.convert_back {
            match serde_json::from_slice::<ChatCompletionResponse>(&reply_body) {
                Ok(parsed) => {
                    let converted = convert_response(parsed, requested_model);
                    match serde_json::to_vec(&converted) {
                        Ok(encoded) => Bytes::from(encoded),
                        Err(_) => reply_body.clone(),
                    }
                }
                Err(err) => {
                    // A 2xx body we cannot convert is a protocol failure.
                    breaker.on_failure();
                    let error = RelayError::new(
                        ErrorKind::UpstreamProtocol,
                        format!("unconvertible upstream body: {err}"),
                    );
                    return self.finish_error(ctx, error, Some(provider));
                }
            }
        } else {
            reply_body.clone()
        };

        breaker.on_success(ctx.started.elapsed());
        let mut ctx = ctx;
        ctx.model = Some(candidate.upstream_model.clone());
        self.record(&ctx, status, Some(provider.clone()), usage, None, None);
        self.log_bodies(&ctx.trace_id, &request_body, &client_body);
        info!(
            event = "relay_responded",
            trace_id = %ctx.trace_id,
            provider = %provider,
            status,
            elapsed_ms = ctx.started.elapsed().as_millis() as u64,
            is_stream = false
        );
        RelayOutcome::Json {
            status,
            content_type: "application/json".to_string(),
            body: client_body,
            trace_id: ctx.trace_id,
        }
    }

    fn finish_upstream_4xx(
        &self,
        ctx: Ctx<'_>,
        status: u16,
        content_type: Option<String>,
        reply_body: Bytes,
        provider: String,
        request_body: Bytes,
    ) -> RelayOutcome {
        let code = provider_error_code(&reply_body);
        self.record(
            &ctx,
            status,
            Some(provider),
            UsageReport::default(),
            Some((
                ErrorKind::UpstreamHttp4xx,
                format!("upstream returned {status}"),
            )),
            code,
        );
        self.log_bodies(&ctx.trace_id, &request_body, &reply_body);
        RelayOutcome::Json {
            status,
            content_type: content_type.unwrap_or_else(|| "application/json".to_string()),
            body: reply_body,
            trace_id: ctx.trace_id,
        }
    }

    fn finish_error(
        &self,
        ctx: Ctx<'_>,
        error: RelayError,
        provider: Option<String>,
    ) -> RelayOutcome {
        let status = error.status().as_u16();
        self.record(
            &ctx,
            status,
            provider,
            UsageReport::default(),
            Some((error.kind, error.message.clone())),
            None,
        );
        let mut body = error.to_body();
        if error.kind == ErrorKind::ProxyDisabled
            && let Some(object) = body.as_object_mut()
        {
            object.insert(
                "app".to_string(),
                JsonValue::String(ctx.family.as_str().to_string()),
            );
        }
        RelayOutcome::Json {
            status,
            content_type: "application/json".to_string(),
            body: Bytes::from(body.to_string()),
            trace_id: ctx.trace_id,
        }
    }

    fn spawn_stream(
        &self,
        job: StreamJob,
        status: u16,
        content_type: Option<String>,
        mut upstream_rx: mpsc::Receiver<Result<Bytes, String>>,
        breaker: Arc<Breaker>,
    ) -> RelayOutcome {
        let (client_tx, client_rx) = mpsc::channel::<Bytes>(32);
        let telemetry = self.telemetry.clone();
        let events = self.events.clone();
        let pricing = self.pricing.clone();
        let config = self.config.clone();
        let trace_id = job.trace_id.clone();

        let outcome_content_type = if job.convert_back {
            "text/event-stream".to_string()
        } else {
            content_type.unwrap_or_else(|| "text/event-stream".to_string())
        };

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut tap = StreamUsage::new(job.upstream_schema);
            let mut converter = job
                .convert_back
                .then(|| StreamConverter::new(job.requested_model.clone()));
            let mut captured = String::new();
            let mut failure: Option<(ErrorKind, String)> = None;

            while let Some(item) = upstream_rx.recv().await {
                match item {
                    Ok(chunk) => {
                        let frames = decoder.feed(&chunk);
                        for frame in &frames {
                            tap.push_data(&frame.data);
                        }
                        let outbound: Option<Bytes> = match converter.as_mut() {
                            Some(converter) => {
                                let mut out = String::new();
                                for frame in &frames {
                                    if let Some(converted) = converter.convert_data(&frame.data) {
                                        out.push_str(&converted);
                                    }
                                }
                                (!out.is_empty()).then(|| Bytes::from(out))
                            }
                            None => Some(chunk),
                        };
                        if let Some(bytes) = outbound {
                            if config.body_logging && captured.len() < BODY_CAPTURE_LIMIT {
                                captured.push_str(&String::from_utf8_lossy(&bytes));
                            }
                            if client_tx.send(bytes).await.is_err() {
                                // Client hung up; cancel the upstream read
                                // and account the interruption.
                                failure = Some((
                                    ErrorKind::UpstreamTransport,
                                    "client disconnected mid-stream".to_string(),
                                ));
                                break;
                            }
                        }
                    }
                    Err(message) => {
                        failure = Some((ErrorKind::UpstreamProtocol, message));
                        break;
                    }
                }
            }
            if let Some(frame) = decoder.finish() {
                tap.push_data(&frame.data);
            }

            let usage = tap.finish();
            let duration = job.started.elapsed();
            match &failure {
                None => breaker.on_success(duration),
                Some(_) => breaker.on_failure(),
            }

            let cost = pricing.cost(&job.upstream_model, &usage);
            let (status_code, error): (i32, Option<(ErrorKind, String)>) = match failure {
                None => (200, None),
                Some((kind, message)) => (502, Some((kind, message))),
            };
            let had_error = error.is_some();
            let event = build_log_event(
                &job.trace_id,
                job.family,
                Some(job.upstream_model.clone()),
                Some(job.provider.clone()),
                status_code,
                usage,
                cost,
                true,
                duration.as_secs_f64(),
                &job.meta,
                error,
                None,
            );
            telemetry.record_request(event);
            if config.body_logging {
                let now = OffsetDateTime::now_utc();
                telemetry.record_body(cswitch_common::BodyLogEvent {
                    trace_id: job.trace_id.clone(),
                    request_body: String::from_utf8_lossy(&job.request_body).to_string(),
                    response_body: captured,
                    body_size_bytes: job.request_body.len() as i64,
                    created_at: now,
                    expires_at: now + config.body_ttl,
                });
            }
            events.emit(RelayEvent::response(
                job.family,
                &job.trace_id,
                Some(&job.provider),
                Some(&job.upstream_model),
                status_code as u16,
                usage.input_tokens,
                usage.output_tokens,
                cost.total_cost,
                duration.as_secs_f64(),
            ));
            info!(
                event = "relay_stream_closed",
                trace_id = %job.trace_id,
                provider = %job.provider,
                status = status_code,
                elapsed_ms = duration.as_millis() as u64,
                had_error
            );
        });

        RelayOutcome::Stream {
            status,
            content_type: outcome_content_type,
            rx: client_rx,
            trace_id,
        }
    }

    /// One telemetry row + one response event per request outcome.
    fn record(
        &self,
        ctx: &Ctx<'_>,
        status: u16,
        provider: Option<String>,
        usage: UsageReport,
        error: Option<(ErrorKind, String)>,
        provider_error_code: Option<String>,
    ) {
        let model_for_cost = ctx.model.as_deref().unwrap_or("");
        let cost = if usage.is_empty() {
            CostBreakdown::default()
        } else {
            self.pricing.cost(model_for_cost, &usage)
        };
        let duration = ctx.started.elapsed().as_secs_f64();
        let event = build_log_event(
            &ctx.trace_id,
            ctx.family,
            ctx.model.clone(),
            provider.clone(),
            status as i32,
            usage,
            cost,
            ctx.stream,
            duration,
            ctx.meta,
            error,
            provider_error_code,
        );
        self.telemetry.record_request(event);
        self.events.emit(RelayEvent::response(
            ctx.family,
            &ctx.trace_id,
            provider.as_deref(),
            ctx.model.as_deref(),
            status,
            usage.input_tokens,
            usage.output_tokens,
            cost.total_cost,
            duration,
        ));
    }

    fn log_bodies(&self, trace_id: &str, request_body: &Bytes, response_body: &Bytes) {
        if !self.config.body_logging {
            return;
        }
        let now = OffsetDateTime::now_utc();
        self.telemetry.record_body(cswitch_common::BodyLogEvent {
            trace_id: trace_id.to_string(),
            request_body: String::from_utf8_lossy(request_body).to_string(),
            response_body: String::from_utf8_lossy(response_body).to_string(),
            body_size_bytes: (request_body.len() + response_body.len()) as i64,
            created_at: now,
            expires_at: now + self.config.body_ttl,
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn build_log_event(
    trace_id: &str,
    family: Family,
    model: Option<String>,
    provider: Option<String>,
    status: i32,
    usage: UsageReport,
    cost: CostBreakdown,
    stream: bool,
    duration_secs: f64,
    meta: &InboundMeta,
    error: Option<(ErrorKind, String)>,
    provider_error_code: Option<String>,
) -> cswitch_common::RequestLogEvent {
    let (error_type, error_message) = match error {
        Some((kind, message)) => (Some(kind), Some(message)),
        None => (None, None),
    };
    cswitch_common::RequestLogEvent {
        trace_id: trace_id.to_string(),
        request_id: meta.request_id.clone(),
        family,
        model,
        provider,
        http_status: status,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_create_tokens: usage.cache_create_tokens,
        cache_read_tokens: usage.cache_read_tokens,
        reasoning_tokens: usage.reasoning_tokens,
        stream,
        duration_secs,
        input_cost: cost.input_cost,
        output_cost: cost.output_cost,
        cache_create_cost: cost.cache_create_cost,
        cache_read_cost: cost.cache_read_cost,
        cache_5m_cost: cost.cache_5m_cost,
        cache_1h_cost: cost.cache_1h_cost,
        total_cost: cost.total_cost,
        user_agent: meta.user_agent.clone(),
        client_ip: meta.client_ip.clone(),
        user_id: meta.user_id.clone(),
        method: meta.method.clone(),
        path: meta.path.clone(),
        error_type,
        error_message,
        provider_error_code,
        created_at: OffsetDateTime::now_utc(),
    }
}

/// Best-effort pull of a provider-side error code from an error body.
fn provider_error_code(body: &Bytes) -> Option<String> {
    let value: JsonValue = serde_json::from_slice(body).ok()?;
    let error = value.get("error")?;
    match error {
        JsonValue::String(code) => Some(code.clone()),
        JsonValue::Object(object) => object
            .get("code")
            .or_else(|| object.get("type"))
            .and_then(|code| match code {
                JsonValue::String(code) => Some(code.clone()),
                JsonValue::Number(code) => Some(code.to_string()),
                _ => None,
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_code_reads_common_shapes() {
        assert_eq!(
            provider_error_code(&Bytes::from_static(br#"{"error":"invalid_api_key"}"#)),
            Some("invalid_api_key".to_string())
        );
        assert_eq!(
            provider_error_code(&Bytes::from_static(
                br#"{"error":{"type":"authentication_error","message":"no"}}"#
            )),
            Some("authentication_error".to_string())
        );
        assert_eq!(
            provider_error_code(&Bytes::from_static(br#"{"error":{"code":429}}"#)),
            Some("429".to_string())
        );
        assert_eq!(provider_error_code(&Bytes::from_static(b"not json")), None);
    }
}
