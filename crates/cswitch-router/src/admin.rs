//! Read-only admin surface: registry snapshot, request logs, captured
//! bodies, daily usage, breaker health. Configuration editing lives in
//! the desktop shell, not here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use cswitch_common::{Family, ProviderRecord};
use cswitch_relay::RelayEngine;
use cswitch_storage::{LogFilter, RelayStore};

#[derive(Clone)]
struct AdminState {
    engine: Arc<RelayEngine>,
    store: RelayStore,
}

pub fn admin_router(engine: Arc<RelayEngine>, store: RelayStore) -> Router {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/health", get(breaker_health))
        .route("/logs", get(list_logs))
        .route("/logs/{trace_id}/body", get(get_body))
        .route("/usage/daily", get(daily_usage))
        .with_state(AdminState { engine, store })
}

async fn list_providers(State(state): State<AdminState>) -> Response {
    let snapshot = state.engine.registry().snapshot();
    let providers: Vec<serde_json::Value> =
        snapshot.all().iter().map(|record| redacted(record)).collect();
    Json(json!({ "providers": providers })).into_response()
}

/// Providers are listed with the key reduced to its tail; the full key
/// never leaves the store through this surface.
fn redacted(record: &ProviderRecord) -> serde_json::Value {
    let mut value = serde_json::to_value(record).unwrap_or_default();
    if let Some(object) = value.as_object_mut() {
        let masked = mask_key(&record.api_key);
        object.insert("api_key".to_string(), json!(masked));
    }
    value
}

fn mask_key(key: &str) -> String {
    if key.len() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", &key[key.len() - 4..])
    }
}

async fn breaker_health(State(state): State<AdminState>) -> Response {
    let rows = state.engine.breakers().metrics_all();
    Json(json!({ "providers": rows })).into_response()
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    family: Option<String>,
    provider: Option<String>,
    /// Unix seconds, inclusive.
    from: Option<i64>,
    to: Option<i64>,
    search: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

async fn list_logs(
    State(state): State<AdminState>,
    Query(query): Query<LogQuery>,
) -> Response {
    let filter = LogFilter {
        family: query.family.as_deref().and_then(Family::parse),
        provider: query.provider,
        from: query.from.and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
        to: query.to.and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
        search: query.search,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    match state.store.query_logs(filter).await {
        Ok(page) => Json(json!({
            "rows": page.rows,
            "has_more": page.has_more,
        }))
        .into_response(),
        Err(err) => storage_error(err),
    }
}

async fn get_body(
    State(state): State<AdminState>,
    Path(trace_id): Path<String>,
) -> Response {
    match state.store.get_body(&trace_id).await {
        Ok(Some(row)) => Json(row).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": true, "type": "not_found"})),
        )
            .into_response(),
        Err(err) => storage_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    from: Option<i64>,
    to: Option<i64>,
}

async fn daily_usage(
    State(state): State<AdminState>,
    Query(query): Query<UsageQuery>,
) -> Response {
    let now = OffsetDateTime::now_utc();
    let from = query
        .from
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or(now - time::Duration::days(7));
    let to = query
        .to
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or(now);
    match state.store.daily_usage(from, to).await {
        Ok(rows) => Json(json!({ "days": rows })).into_response(),
        Err(err) => storage_error(err),
    }
}

fn storage_error(err: cswitch_storage::StorageError) -> Response {
    tracing::warn!(event = "admin_query_failed", error = %err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": true, "message": err.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_masked_to_a_tail() {
        assert_eq!(mask_key("sk-1234567890"), "****7890");
        assert_eq!(mask_key("abc"), "****");
    }
}
