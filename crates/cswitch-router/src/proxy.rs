//! The relay HTTP surface: the client-facing model routes plus a
//! liveness probe.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use cswitch_relay::{classify, InboundMeta, RelayEngine, RelayOutcome};

const TRACE_HEADER: &str = "x-cswitch-trace-id";

pub fn proxy_router(engine: Arc<RelayEngine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/messages", post(relay_handler))
        .route("/responses", post(relay_handler))
        .route("/v1/chat/completions", post(relay_handler))
        .route("/chat/completions", post(relay_handler))
        .route("/v1beta/models/{*model_action}", post(relay_handler))
        .with_state(engine)
}

async fn healthz() -> Response {
    json_response(
        StatusCode::OK,
        Bytes::from_static(br#"{"status":"ok"}"#),
        None,
    )
}

async fn relay_handler(
    State(engine): State<Arc<RelayEngine>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let Some(route) = classify(&method, &path) else {
        return json_response(
            StatusCode::NOT_FOUND,
            Bytes::from_static(br#"{"error":true,"type":"not_found"}"#),
            None,
        );
    };

    let meta = InboundMeta {
        method: method.to_string(),
        path,
        user_agent: header_value(&headers, "user-agent"),
        client_ip: Some(addr.ip().to_string()),
        request_id: header_value(&headers, "x-request-id")
            .or_else(|| header_value(&headers, "request-id")),
        user_id: header_value(&headers, "x-user-id"),
    };

    match engine.handle(route, body, meta).await {
        RelayOutcome::Json {
            status,
            content_type,
            body,
            trace_id,
        } => {
            let mut response = json_response(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                body,
                Some(&content_type),
            );
            stamp_trace(&mut response, &trace_id);
            response
        }
        RelayOutcome::Stream {
            status,
            content_type,
            rx,
            trace_id,
        } => {
            let stream = ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() =
                StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert("content-type", value);
            }
            response
                .headers_mut()
                .insert("cache-control", HeaderValue::from_static("no-cache"));
            stamp_trace(&mut response, &trace_id);
            response
        }
    }
}

fn stamp_trace(response: &mut Response, trace_id: &str) {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
}

fn json_response(status: StatusCode, body: Bytes, content_type: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let value = content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    response.headers_mut().insert("content-type", value);
    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
