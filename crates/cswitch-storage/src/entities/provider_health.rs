use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_health")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider_id: i64,
    pub circuit_state: String,
    pub consecutive_fails: i32,
    pub fail_threshold: i32,
    pub recovery_timeout_sec: i64,
    pub success_threshold: i32,
    pub total_requests: i64,
    pub total_failures: i64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub last_success_at: Option<OffsetDateTime>,
    pub last_failure_at: Option<OffsetDateTime>,
    pub circuit_opened_at: Option<OffsetDateTime>,
    pub last_checked_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::provider_config::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
