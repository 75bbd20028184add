#![allow(clippy::needless_update)]

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, ExprTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use time::OffsetDateTime;

use cswitch_common::{
    BodyLogEvent, CircuitState, Family, HealthSnapshot, ProviderRecord, RequestLogEvent,
};

use crate::db::connect_shared;
use crate::entities;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub family: Option<Family>,
    pub provider: Option<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    /// Substring over trace id, error message, model, and provider.
    pub search: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct LogPage {
    pub rows: Vec<entities::request_log::Model>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, FromQueryResult, serde::Serialize)]
pub struct DailyUsageRow {
    pub day: Option<String>,
    pub provider: Option<String>,
    pub requests: Option<i64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_cost: Option<f64>,
}

#[derive(Clone)]
pub struct RelayStore {
    db: DatabaseConnection,
}

impl RelayStore {
    pub async fn connect(dsn: &str) -> Result<Self, DbErr> {
        let db = connect_shared(dsn).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync, then backup triggers, then versioned
    /// migrations. Runs once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::ProviderConfig)
            .register(entities::ProviderHealth)
            .register(entities::ProxyControl)
            .register(entities::RequestLog)
            .register(entities::RequestLogBody)
            .register(entities::ProxyLiveBackup)
            .register(entities::SchemaVersion)
            .sync(&self.db)
            .await?;
        crate::backup::ensure_triggers(&self.db).await?;
        crate::migrate::run(&self.db).await?;
        Ok(())
    }

    // ---- providers ----------------------------------------------------

    pub async fn list_providers(&self) -> StorageResult<Vec<ProviderRecord>> {
        let rows = entities::ProviderConfig::find()
            .order_by_asc(entities::provider_config::Column::Id)
            .all(&self.db)
            .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn insert_provider(&self, record: &ProviderRecord) -> StorageResult<i64> {
        let mut active = record_to_active(record)?;
        active.id = ActiveValue::NotSet;
        let result = entities::ProviderConfig::insert(active)
            .exec(&self.db)
            .await?;
        Ok(result.last_insert_id)
    }

    pub async fn update_provider(&self, record: &ProviderRecord) -> StorageResult<()> {
        let active = record_to_active(record)?;
        entities::ProviderConfig::update(active).exec(&self.db).await?;
        Ok(())
    }

    /// Insert-or-replace keeping the row id; used by crash recovery.
    pub async fn upsert_provider(&self, record: &ProviderRecord) -> StorageResult<()> {
        use entities::provider_config::Column;
        let active = record_to_active(record)?;
        entities::ProviderConfig::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Platform,
                        Column::Name,
                        Column::ApiUrl,
                        Column::ApiKey,
                        Column::OfficialUrl,
                        Column::Icon,
                        Column::Enabled,
                        Column::SupportedModels,
                        Column::ModelMapping,
                        Column::PriorityLevel,
                        Column::Weight,
                        Column::Tint,
                        Column::Accent,
                        Column::CreatedAt,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_provider(&self, id: i64) -> StorageResult<()> {
        entities::ProviderConfig::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ---- provider health ----------------------------------------------

    pub async fn load_health(&self) -> StorageResult<Vec<HealthSnapshot>> {
        let rows = entities::ProviderHealth::find().all(&self.db).await?;
        Ok(rows.into_iter().map(health_row_to_snapshot).collect())
    }

    pub async fn upsert_health(&self, snapshot: &HealthSnapshot) -> StorageResult<()> {
        use entities::provider_health::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::provider_health::ActiveModel {
            provider_id: ActiveValue::Set(snapshot.provider_id),
            circuit_state: ActiveValue::Set(snapshot.state.as_str().to_string()),
            consecutive_fails: ActiveValue::Set(snapshot.consecutive_fails as i32),
            fail_threshold: ActiveValue::Set(snapshot.fail_threshold as i32),
            recovery_timeout_sec: ActiveValue::Set(snapshot.recovery_timeout_sec as i64),
            success_threshold: ActiveValue::Set(snapshot.success_threshold as i32),
            total_requests: ActiveValue::Set(snapshot.total_requests),
            total_failures: ActiveValue::Set(snapshot.total_failures),
            success_rate: ActiveValue::Set(snapshot.success_rate),
            avg_latency_ms: ActiveValue::Set(snapshot.avg_latency_ms),
            last_success_at: ActiveValue::Set(snapshot.last_success_at),
            last_failure_at: ActiveValue::Set(snapshot.last_failure_at),
            circuit_opened_at: ActiveValue::Set(snapshot.circuit_opened_at),
            last_checked_at: ActiveValue::Set(Some(now)),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::ProviderHealth::insert(active)
            .on_conflict(
                OnConflict::column(Column::ProviderId)
                    .update_columns([
                        Column::CircuitState,
                        Column::ConsecutiveFails,
                        Column::FailThreshold,
                        Column::RecoveryTimeoutSec,
                        Column::SuccessThreshold,
                        Column::TotalRequests,
                        Column::TotalFailures,
                        Column::SuccessRate,
                        Column::AvgLatencyMs,
                        Column::LastSuccessAt,
                        Column::LastFailureAt,
                        Column::CircuitOpenedAt,
                        Column::LastCheckedAt,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- proxy control (app gate) --------------------------------------

    /// Insert missing rows for the known families, enabled by default.
    pub async fn seed_proxy_control(&self) -> StorageResult<()> {
        let existing: Vec<String> = entities::ProxyControl::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.app_name)
            .collect();
        for family in Family::ALL {
            if existing.iter().any(|name| name == family.as_str()) {
                continue;
            }
            let active = entities::proxy_control::ActiveModel {
                app_name: ActiveValue::Set(family.as_str().to_string()),
                proxy_enabled: ActiveValue::Set(true),
                total_requests: ActiveValue::Set(0),
                last_request_at: ActiveValue::Set(None),
                last_toggled_at: ActiveValue::Set(None),
                ..Default::default()
            };
            entities::ProxyControl::insert(active).exec(&self.db).await?;
        }
        Ok(())
    }

    pub async fn load_proxy_control(&self) -> StorageResult<Vec<(Family, bool)>> {
        let rows = entities::ProxyControl::find().all(&self.db).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| Family::parse(&row.app_name).map(|f| (f, row.proxy_enabled)))
            .collect())
    }

    pub async fn set_proxy_enabled(&self, family: Family, enabled: bool) -> StorageResult<()> {
        use entities::proxy_control::Column;
        entities::ProxyControl::update_many()
            .col_expr(Column::ProxyEnabled, Expr::value(enabled))
            .col_expr(
                Column::LastToggledAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(Column::AppName.eq(family.as_str()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn bump_proxy_counter(
        &self,
        family: Family,
        at: OffsetDateTime,
    ) -> StorageResult<()> {
        use entities::proxy_control::Column;
        entities::ProxyControl::update_many()
            .col_expr(
                Column::TotalRequests,
                Expr::col(Column::TotalRequests).add(1),
            )
            .col_expr(Column::LastRequestAt, Expr::value(at))
            .filter(Column::AppName.eq(family.as_str()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- telemetry -----------------------------------------------------

    pub async fn insert_request_logs(&self, batch: &[RequestLogEvent]) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let models = batch.iter().cloned().map(request_log_to_active);
        entities::RequestLog::insert_many(models).exec(&self.db).await?;
        Ok(())
    }

    pub async fn insert_body_logs(&self, batch: &[BodyLogEvent]) -> StorageResult<()> {
        use entities::request_log_body::Column;
        if batch.is_empty() {
            return Ok(());
        }
        let models = batch.iter().cloned().map(body_log_to_active);
        entities::RequestLogBody::insert_many(models)
            .on_conflict(
                OnConflict::column(Column::TraceId)
                    .update_columns([
                        Column::RequestBody,
                        Column::ResponseBody,
                        Column::BodySizeBytes,
                        Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn sweep_expired_bodies(&self, now: OffsetDateTime) -> StorageResult<u64> {
        use entities::request_log_body::Column;
        let result = entities::RequestLogBody::delete_many()
            .filter(Column::ExpiresAt.lt(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn query_logs(&self, filter: LogFilter) -> StorageResult<LogPage> {
        use entities::request_log::Column;
        let limit = filter.limit.clamp(1, 500);

        let mut query = entities::RequestLog::find();
        if let Some(family) = filter.family {
            query = query.filter(Column::Family.eq(family.as_str()));
        }
        if let Some(provider) = &filter.provider {
            query = query.filter(Column::Provider.eq(provider.clone()));
        }
        if let Some(from) = filter.from {
            query = query.filter(Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(Column::CreatedAt.lte(to));
        }
        if let Some(search) = &filter.search
            && !search.is_empty()
        {
            query = query.filter(
                Condition::any()
                    .add(Column::TraceId.contains(search.clone()))
                    .add(Column::ErrorMessage.contains(search.clone()))
                    .add(Column::Model.contains(search.clone()))
                    .add(Column::Provider.contains(search.clone())),
            );
        }

        let mut rows = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .offset(filter.offset)
            .limit(limit + 1)
            .all(&self.db)
            .await?;
        let has_more = rows.len() as u64 > limit;
        rows.truncate(limit as usize);
        Ok(LogPage { rows, has_more })
    }

    pub async fn get_body(
        &self,
        trace_id: &str,
    ) -> StorageResult<Option<entities::request_log_body::Model>> {
        use entities::request_log_body::Column;
        Ok(entities::RequestLogBody::find()
            .filter(Column::TraceId.eq(trace_id))
            .one(&self.db)
            .await?)
    }

    pub async fn daily_usage(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> StorageResult<Vec<DailyUsageRow>> {
        use entities::request_log::Column;
        let rows = entities::RequestLog::find()
            .select_only()
            .column_as(Expr::cust("date(created_at)"), "day")
            .column(Column::Provider)
            .column_as(Expr::col(Column::Id).count(), "requests")
            .column_as(Expr::col(Column::InputTokens).sum(), "input_tokens")
            .column_as(Expr::col(Column::OutputTokens).sum(), "output_tokens")
            .column_as(Expr::col(Column::TotalCost).sum(), "total_cost")
            .filter(Column::CreatedAt.gte(from))
            .filter(Column::CreatedAt.lte(to))
            .group_by(Expr::cust("date(created_at)"))
            .group_by(Column::Provider)
            .into_model::<DailyUsageRow>()
            .all(&self.db)
            .await?;
        Ok(rows)
    }
}

// ---- row conversions ----------------------------------------------------

fn row_to_record(row: entities::provider_config::Model) -> StorageResult<ProviderRecord> {
    let platform = Family::parse(&row.platform)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown platform {:?}", row.platform)))?;
    Ok(ProviderRecord {
        id: row.id,
        platform,
        name: row.name,
        api_url: row.api_url,
        api_key: row.api_key,
        official_url: row.official_url,
        icon: row.icon,
        enabled: row.enabled,
        priority_level: row.priority_level,
        weight: row.weight,
        supported_models: serde_json::from_value(row.supported_models)?,
        model_mapping: serde_json::from_value(row.model_mapping)?,
        tint: row.tint,
        accent: row.accent,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn record_to_active(
    record: &ProviderRecord,
) -> StorageResult<entities::provider_config::ActiveModel> {
    Ok(entities::provider_config::ActiveModel {
        id: ActiveValue::Set(record.id),
        platform: ActiveValue::Set(record.platform.as_str().to_string()),
        name: ActiveValue::Set(record.name.clone()),
        api_url: ActiveValue::Set(record.api_url.clone()),
        api_key: ActiveValue::Set(record.api_key.clone()),
        official_url: ActiveValue::Set(record.official_url.clone()),
        icon: ActiveValue::Set(record.icon.clone()),
        enabled: ActiveValue::Set(record.enabled),
        supported_models: ActiveValue::Set(serde_json::to_value(&record.supported_models)?),
        model_mapping: ActiveValue::Set(serde_json::to_value(&record.model_mapping)?),
        priority_level: ActiveValue::Set(record.priority_level),
        weight: ActiveValue::Set(record.weight),
        tint: ActiveValue::Set(record.tint.clone()),
        accent: ActiveValue::Set(record.accent.clone()),
        created_at: ActiveValue::Set(record.created_at),
        updated_at: ActiveValue::Set(record.updated_at),
        ..Default::default()
    })
}

fn health_row_to_snapshot(row: entities::provider_health::Model) -> HealthSnapshot {
    HealthSnapshot {
        provider_id: row.provider_id,
        state: CircuitState::parse(&row.circuit_state).unwrap_or(CircuitState::Closed),
        consecutive_fails: Ord::max(row.consecutive_fails, 0) as u32,
        fail_threshold: Ord::max(row.fail_threshold, 1) as u32,
        recovery_timeout_sec: Ord::max(row.recovery_timeout_sec, 0) as u64,
        success_threshold: Ord::max(row.success_threshold, 1) as u32,
        total_requests: row.total_requests,
        total_failures: row.total_failures,
        success_rate: row.success_rate,
        avg_latency_ms: row.avg_latency_ms,
        last_success_at: row.last_success_at,
        last_failure_at: row.last_failure_at,
        circuit_opened_at: row.circuit_opened_at,
    }
}

fn request_log_to_active(event: RequestLogEvent) -> entities::request_log::ActiveModel {
    entities::request_log::ActiveModel {
        id: ActiveValue::NotSet,
        trace_id: ActiveValue::Set(event.trace_id),
        request_id: ActiveValue::Set(event.request_id),
        family: ActiveValue::Set(event.family.as_str().to_string()),
        model: ActiveValue::Set(event.model),
        provider: ActiveValue::Set(event.provider),
        http_status: ActiveValue::Set(event.http_status),
        input_tokens: ActiveValue::Set(event.input_tokens),
        output_tokens: ActiveValue::Set(event.output_tokens),
        cache_create_tokens: ActiveValue::Set(event.cache_create_tokens),
        cache_read_tokens: ActiveValue::Set(event.cache_read_tokens),
        reasoning_tokens: ActiveValue::Set(event.reasoning_tokens),
        is_stream: ActiveValue::Set(event.stream),
        duration_secs: ActiveValue::Set(event.duration_secs),
        input_cost: ActiveValue::Set(event.input_cost),
        output_cost: ActiveValue::Set(event.output_cost),
        cache_create_cost: ActiveValue::Set(event.cache_create_cost),
        cache_read_cost: ActiveValue::Set(event.cache_read_cost),
        cache_5m_cost: ActiveValue::Set(event.cache_5m_cost),
        cache_1h_cost: ActiveValue::Set(event.cache_1h_cost),
        total_cost: ActiveValue::Set(event.total_cost),
        user_agent: ActiveValue::Set(event.user_agent),
        client_ip: ActiveValue::Set(event.client_ip),
        user_id: ActiveValue::Set(event.user_id),
        method: ActiveValue::Set(event.method),
        path: ActiveValue::Set(event.path),
        error_type: ActiveValue::Set(event.error_type.map(|kind| kind.as_str().to_string())),
        error_message: ActiveValue::Set(event.error_message),
        provider_error_code: ActiveValue::Set(event.provider_error_code),
        created_at: ActiveValue::Set(event.created_at),
        ..Default::default()
    }
}

fn body_log_to_active(event: BodyLogEvent) -> entities::request_log_body::ActiveModel {
    entities::request_log_body::ActiveModel {
        trace_id: ActiveValue::Set(event.trace_id),
        request_body: ActiveValue::Set(event.request_body),
        response_body: ActiveValue::Set(event.response_body),
        body_size_bytes: ActiveValue::Set(event.body_size_bytes),
        created_at: ActiveValue::Set(event.created_at),
        expires_at: ActiveValue::Set(event.expires_at),
        ..Default::default()
    }
}
