//! End-to-end relay behavior against in-process mock upstreams.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use sea_orm::{ConnectOptions, Database};

use cswitch_common::{
    BodyLogEvent, BreakerSettings, CircuitState, ErrorKind, Family, ProviderDraft,
    RequestLogEvent, TelemetrySink,
};
use cswitch_pricing::PricingTable;
use cswitch_relay::{
    classify, AppGate, BreakerManager, EngineConfig, EventHub, Forwarder, ForwarderConfig,
    InboundMeta, Registry, RelayEngine, RelayOutcome, Selector,
};
use cswitch_storage::RelayStore;

#[derive(Default)]
struct CaptureSink {
    requests: Mutex<Vec<RequestLogEvent>>,
}

impl TelemetrySink for CaptureSink {
    fn record_request(&self, event: RequestLogEvent) {
        self.requests.lock().unwrap().push(event);
    }

    fn record_body(&self, _event: BodyLogEvent) {}
}

impl CaptureSink {
    fn rows(&self) -> Vec<RequestLogEvent> {
        self.requests.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<RequestLogEvent> {
        for _ in 0..100 {
            let rows = self.rows();
            if rows.len() >= count {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.rows()
    }
}

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn provider(
    family: Family,
    name: &str,
    addr: SocketAddr,
    priority: i32,
    whitelist: &[(&str, bool)],
    mapping: &[(&str, &str)],
) -> ProviderDraft {
    ProviderDraft {
        platform: family,
        name: name.to_string(),
        api_url: format!("http://{addr}"),
        api_key: "sk-test".to_string(),
        official_url: None,
        icon: None,
        enabled: true,
        priority_level: priority,
        weight: 100,
        supported_models: whitelist
            .iter()
            .map(|(pattern, enabled)| (pattern.to_string(), *enabled))
            .collect(),
        model_mapping: mapping
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        tint: None,
        accent: None,
    }
}

struct Harness {
    engine: Arc<RelayEngine>,
    sink: Arc<CaptureSink>,
}

async fn build_harness(drafts: Vec<ProviderDraft>, round_robin: bool) -> Harness {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.unwrap();
    let store = RelayStore::from_connection(db);
    store.sync().await.unwrap();

    let registry = Arc::new(Registry::load(store.clone()).await.unwrap());
    for draft in drafts {
        registry.create(draft).await.unwrap();
    }
    let gate = Arc::new(AppGate::load(store.clone()).await.unwrap());
    let breakers = Arc::new(BreakerManager::with_noop_sink());
    let sink = Arc::new(CaptureSink::default());
    let engine = Arc::new(RelayEngine::new(
        registry,
        breakers,
        gate,
        Selector::new(round_robin),
        Forwarder::new(ForwarderConfig {
            connect_timeout: Duration::from_secs(2),
            unary_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(5),
        })
        .unwrap(),
        Arc::new(PricingTable::new()),
        sink.clone(),
        EventHub::new(16),
        EngineConfig::default(),
    ));
    Harness { engine, sink }
}

fn meta(path: &str) -> InboundMeta {
    InboundMeta {
        method: "POST".to_string(),
        path: path.to_string(),
        user_agent: Some("test-agent".to_string()),
        client_ip: Some("127.0.0.1".to_string()),
        request_id: None,
        user_id: None,
    }
}

async fn post_relay(harness: &Harness, path: &str, body: &str) -> (u16, Bytes) {
    let route = classify(&http::Method::POST, path).unwrap();
    match harness
        .engine
        .handle(route, Bytes::from(body.to_string()), meta(path))
        .await
    {
        RelayOutcome::Json { status, body, .. } => (status, body),
        RelayOutcome::Stream { status, mut rx, .. } => {
            let mut collected = Vec::new();
            while let Some(chunk) = rx.recv().await {
                collected.extend_from_slice(&chunk);
            }
            (status, Bytes::from(collected))
        }
    }
}

fn claude_ok_router() -> Router {
    Router::new().route(
        "/v1/messages",
        post(|| async {
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"id":"msg_1","content":[{"type":"text","text":"hi"}],
                        "usage":{"input_tokens":100,"output_tokens":50}}"#,
                ))
                .unwrap()
        }),
    )
}

fn claude_err_router(status: StatusCode, body: &'static str) -> Router {
    Router::new().route(
        "/v1/messages",
        post(move || async move {
            Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        }),
    )
}

#[tokio::test]
async fn happy_path_unary_selects_priority_one() {
    let good = spawn_upstream(claude_ok_router()).await;
    let backup = spawn_upstream(claude_ok_router()).await;
    let harness = build_harness(
        vec![
            provider(Family::Claude, "P1", good, 1, &[("claude-*", true)], &[]),
            provider(Family::Claude, "P2", backup, 2, &[("claude-*", true)], &[]),
        ],
        false,
    )
    .await;

    let (status, body) = post_relay(
        &harness,
        "/v1/messages",
        r#"{"model":"claude-sonnet-4","stream":false,"messages":[]}"#,
    )
    .await;
    assert_eq!(status, 200);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["usage"]["input_tokens"], 100);

    let rows = harness.sink.wait_for(1).await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.provider.as_deref(), Some("P1"));
    assert_eq!(row.http_status, 200);
    assert_eq!(row.input_tokens, 100);
    assert_eq!(row.output_tokens, 50);
    let expected = 100.0 * 3.0 / 1e6 + 50.0 * 15.0 / 1e6;
    assert!((row.total_cost - expected).abs() < 1e-9);

    let p1 = harness.engine.registry().snapshot().all()[0].clone();
    let metrics = harness.engine.breakers().get(p1.id).metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.state, CircuitState::Closed);
}

#[tokio::test]
async fn failover_on_500_then_breaker_opens() {
    let bad = spawn_upstream(claude_err_router(
        StatusCode::INTERNAL_SERVER_ERROR,
        r#"{"error":"boom"}"#,
    ))
    .await;
    let good = spawn_upstream(claude_ok_router()).await;
    let harness = build_harness(
        vec![
            provider(Family::Claude, "P1", bad, 1, &[("claude-*", true)], &[]),
            provider(Family::Claude, "P2", good, 2, &[("claude-*", true)], &[]),
        ],
        false,
    )
    .await;

    let snapshot = harness.engine.registry().snapshot();
    let p1_id = snapshot
        .all()
        .iter()
        .find(|p| p.name == "P1")
        .unwrap()
        .id;
    let p2_id = snapshot
        .all()
        .iter()
        .find(|p| p.name == "P2")
        .unwrap()
        .id;

    // Five requests: each fails over from P1 to P2 and succeeds.
    for _ in 0..5 {
        let (status, _) = post_relay(
            &harness,
            "/v1/messages",
            r#"{"model":"claude-sonnet-4","messages":[]}"#,
        )
        .await;
        assert_eq!(status, 200);
    }
    let p1 = harness.engine.breakers().get(p1_id).metrics();
    assert_eq!(p1.state, CircuitState::Open);
    assert_eq!(p1.total_requests, 5);
    assert_eq!(p1.total_failures, 5);

    // Sixth request routes straight to P2; P1 is never attempted.
    let (status, _) = post_relay(
        &harness,
        "/v1/messages",
        r#"{"model":"claude-sonnet-4","messages":[]}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        harness.engine.breakers().get(p1_id).metrics().total_requests,
        5
    );
    let p2 = harness.engine.breakers().get(p2_id).metrics();
    assert_eq!(p2.total_requests, 6);
}

#[tokio::test]
async fn upstream_4xx_passes_through_without_failover() {
    let unauthorized = spawn_upstream(claude_err_router(
        StatusCode::UNAUTHORIZED,
        r#"{"error":"invalid_api_key"}"#,
    ))
    .await;
    let good = spawn_upstream(claude_ok_router()).await;
    let harness = build_harness(
        vec![
            provider(Family::Claude, "P1", unauthorized, 1, &[("claude-*", true)], &[]),
            provider(Family::Claude, "P2", good, 2, &[("claude-*", true)], &[]),
        ],
        false,
    )
    .await;

    let (status, body) = post_relay(
        &harness,
        "/v1/messages",
        r#"{"model":"claude-sonnet-4","messages":[]}"#,
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(&body[..], br#"{"error":"invalid_api_key"}"#);

    let rows = harness.sink.wait_for(1).await;
    assert_eq!(rows[0].error_type, Some(ErrorKind::UpstreamHttp4xx));
    assert_eq!(rows[0].provider_error_code.as_deref(), Some("invalid_api_key"));

    let snapshot = harness.engine.registry().snapshot();
    let p1_id = snapshot.all()[0].id;
    let p2_id = snapshot.all()[1].id;
    assert_eq!(
        harness.engine.breakers().get(p1_id).metrics().total_failures,
        0
    );
    // No failover happened.
    assert_eq!(
        harness.engine.breakers().get(p2_id).metrics().total_requests,
        0
    );
}

#[tokio::test]
async fn breaker_recovers_through_half_open() {
    let flip = Arc::new(AtomicU32::new(0));
    let flip_for_handler = flip.clone();
    // Fails until `flip` goes positive, then succeeds.
    let flaky = Router::new().route(
        "/v1/messages",
        post(move || {
            let flip = flip_for_handler.clone();
            async move {
                if flip.load(Ordering::SeqCst) == 0 {
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Body::from(r#"{"error":"down"}"#))
                        .unwrap()
                } else {
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("content-type", "application/json")
                        .body(Body::from(
                            r#"{"id":"msg","usage":{"input_tokens":1,"output_tokens":1}}"#,
                        ))
                        .unwrap()
                }
            }
        }),
    );
    let addr = spawn_upstream(flaky).await;
    let harness = build_harness(
        vec![provider(
            Family::Claude,
            "P1",
            addr,
            1,
            &[("claude-*", true)],
            &[],
        )],
        false,
    )
    .await;

    let p1_id = harness.engine.registry().snapshot().all()[0].id;
    harness.engine.breakers().get(p1_id).configure(BreakerSettings {
        fail_threshold: 5,
        recovery_timeout: Duration::from_millis(100),
        success_threshold: 2,
    });

    for _ in 0..5 {
        let (status, _) = post_relay(
            &harness,
            "/v1/messages",
            r#"{"model":"claude-sonnet-4","messages":[]}"#,
        )
        .await;
        assert_eq!(status, 502);
    }
    assert_eq!(
        harness.engine.breakers().get(p1_id).metrics().state,
        CircuitState::Open
    );

    flip.store(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Two successes close the breaker again.
    for _ in 0..2 {
        let (status, _) = post_relay(
            &harness,
            "/v1/messages",
            r#"{"model":"claude-sonnet-4","messages":[]}"#,
        )
        .await;
        assert_eq!(status, 200);
    }
    assert_eq!(
        harness.engine.breakers().get(p1_id).metrics().state,
        CircuitState::Closed
    );
}

#[tokio::test]
async fn model_mapping_rewrites_outgoing_body() {
    // Echo the received model back so the rewrite is observable.
    let echo = Router::new().route(
        "/v1/chat/completions",
        post(|body: Bytes| async move {
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let model = value["model"].as_str().unwrap_or("").to_string();
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "choices": [{"message": {"content": model}, "finish_reason": "stop"}],
                        "usage": {"prompt_tokens": 2, "completion_tokens": 1, "total_tokens": 3}
                    })
                    .to_string(),
                ))
                .unwrap()
        }),
    );
    let addr = spawn_upstream(echo).await;
    let harness = build_harness(
        vec![provider(
            Family::Generic,
            "PX",
            addr,
            1,
            &[("acest", true)],
            &[("acest", "deepseek-chat")],
        )],
        false,
    )
    .await;

    let (status, body) = post_relay(
        &harness,
        "/chat/completions",
        r#"{"model":"acest","messages":[{"role":"user","content":"hi"}]}"#,
    )
    .await;
    assert_eq!(status, 200);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["choices"][0]["message"]["content"], "deepseek-chat");

    let rows = harness.sink.wait_for(1).await;
    assert_eq!(rows[0].model.as_deref(), Some("deepseek-chat"));
}

#[tokio::test]
async fn disabled_family_gets_503() {
    let good = spawn_upstream(claude_ok_router()).await;
    let harness = build_harness(
        vec![provider(
            Family::Claude,
            "P1",
            good,
            1,
            &[("claude-*", true)],
            &[],
        )],
        false,
    )
    .await;
    harness
        .engine
        .gate()
        .set_enabled(Family::Claude, false)
        .await
        .unwrap();

    let (status, body) = post_relay(
        &harness,
        "/v1/messages",
        r#"{"model":"claude-sonnet-4","messages":[]}"#,
    )
    .await;
    assert_eq!(status, 503);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["type"], "proxy_disabled");
    assert_eq!(value["app"], "claude");
}

#[tokio::test]
async fn selection_errors_map_to_503_bodies() {
    let harness = build_harness(vec![], false).await;
    let (status, body) = post_relay(
        &harness,
        "/v1/messages",
        r#"{"model":"claude-sonnet-4","messages":[]}"#,
    )
    .await;
    assert_eq!(status, 503);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["type"], "no_provider_configured");
}

#[tokio::test]
async fn streamed_sse_relays_and_accounts_usage() {
    let sse = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let frames = [
                "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2,\"total_tokens\":9}}\n\n",
                "data: [DONE]\n\n",
            ];
            let stream = tokio_stream::iter(
                frames
                    .into_iter()
                    .map(|frame| Ok::<_, std::convert::Infallible>(Bytes::from(frame))),
            );
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(stream))
                .unwrap()
        }),
    );
    let addr = spawn_upstream(sse).await;
    let harness = build_harness(
        vec![provider(
            Family::Generic,
            "S1",
            addr,
            1,
            &[("deepseek-*", true)],
            &[],
        )],
        false,
    )
    .await;

    let (status, body) = post_relay(
        &harness,
        "/chat/completions",
        r#"{"model":"deepseek-chat","stream":true,"messages":[]}"#,
    )
    .await;
    assert_eq!(status, 200);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("hel"));
    assert!(text.contains("[DONE]"));

    let rows = harness.sink.wait_for(1).await;
    let row = &rows[0];
    assert!(row.stream);
    assert_eq!(row.input_tokens, 7);
    assert_eq!(row.output_tokens, 2);
    assert_eq!(row.error_type, None);
}

#[tokio::test]
async fn gemini_route_converts_to_openai_and_back() {
    let sse = Router::new().route(
        "/v1/chat/completions",
        post(|body: Bytes| async move {
            // The converted request must be openai-chat with a system turn.
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["stream"], true);
            assert_eq!(value["messages"][0]["role"], "system");
            assert_eq!(value["model"], "gemini-2.5-flash");

            let frames = [
                "data: {\"choices\":[{\"delta\":{\"content\":\"pong\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":1,\"total_tokens\":5}}\n\n",
                "data: [DONE]\n\n",
            ];
            let stream = tokio_stream::iter(
                frames
                    .into_iter()
                    .map(|frame| Ok::<_, std::convert::Infallible>(Bytes::from(frame))),
            );
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(stream))
                .unwrap()
        }),
    );
    let addr = spawn_upstream(sse).await;
    let harness = build_harness(
        vec![provider(
            Family::Gemini,
            "G1",
            addr,
            1,
            &[("gemini-*", true)],
            &[],
        )],
        false,
    )
    .await;

    let (status, body) = post_relay(
        &harness,
        "/v1beta/models/gemini-2.5-flash:streamGenerateContent",
        r#"{"contents":[{"role":"user","parts":[{"text":"ping"}]}],
            "systemInstruction":{"parts":[{"text":"pong only"}]}}"#,
    )
    .await;
    assert_eq!(status, 200);
    let text = String::from_utf8_lossy(&body);
    // Converted back to gemini-native framing, no [DONE] sentinel.
    assert!(text.contains("\"candidates\""));
    assert!(text.contains("pong"));
    assert!(!text.contains("[DONE]"));
    assert!(text.contains("usageMetadata"));

    let rows = harness.sink.wait_for(1).await;
    assert_eq!(rows[0].input_tokens, 4);
    assert_eq!(rows[0].output_tokens, 1);
}

#[tokio::test]
async fn all_5xx_candidates_return_last_upstream_body() {
    let bad1 = spawn_upstream(claude_err_router(
        StatusCode::INTERNAL_SERVER_ERROR,
        r#"{"error":"first"}"#,
    ))
    .await;
    let bad2 = spawn_upstream(claude_err_router(
        StatusCode::SERVICE_UNAVAILABLE,
        r#"{"error":"second"}"#,
    ))
    .await;
    let harness = build_harness(
        vec![
            provider(Family::Claude, "B1", bad1, 1, &[("claude-*", true)], &[]),
            provider(Family::Claude, "B2", bad2, 2, &[("claude-*", true)], &[]),
        ],
        false,
    )
    .await;

    let (status, body) = post_relay(
        &harness,
        "/v1/messages",
        r#"{"model":"claude-sonnet-4","messages":[]}"#,
    )
    .await;
    assert_eq!(status, 502);
    assert_eq!(&body[..], br#"{"error":"second"}"#);

    let rows = harness.sink.wait_for(1).await;
    assert_eq!(rows[0].error_type, Some(ErrorKind::UpstreamHttp5xx));
}
