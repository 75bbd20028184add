pub mod provider_config;
pub mod provider_health;
pub mod proxy_control;
pub mod proxy_live_backup;
pub mod request_log;
pub mod request_log_body;
pub mod schema_version;

pub use provider_config::Entity as ProviderConfig;
pub use provider_health::Entity as ProviderHealth;
pub use proxy_control::Entity as ProxyControl;
pub use proxy_live_backup::Entity as ProxyLiveBackup;
pub use request_log::Entity as RequestLog;
pub use request_log_body::Entity as RequestLogBody;
pub use schema_version::Entity as SchemaVersion;
