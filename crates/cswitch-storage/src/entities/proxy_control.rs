use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_control")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub app_name: String,
    pub proxy_enabled: bool,
    pub total_requests: i64,
    pub last_request_at: Option<OffsetDateTime>,
    pub last_toggled_at: Option<OffsetDateTime>,
}

impl ActiveModelBehavior for ActiveModel {}
