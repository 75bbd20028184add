use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_live_backup")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub backup_type: String,
    pub backup_data: Json,
    pub trigger_event: String,
    pub backup_time: OffsetDateTime,
    pub restored: bool,
    pub restored_at: Option<OffsetDateTime>,
}

impl ActiveModelBehavior for ActiveModel {}
