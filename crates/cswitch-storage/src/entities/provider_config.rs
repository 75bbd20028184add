use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "platform_name")]
    pub platform: String,
    #[sea_orm(unique_key = "platform_name")]
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub official_url: Option<String>,
    pub icon: Option<String>,
    pub enabled: bool,
    pub supported_models: Json,
    pub model_mapping: Json,
    pub priority_level: i32,
    pub weight: i32,
    pub tint: Option<String>,
    pub accent: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub health: HasMany<super::provider_health::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
