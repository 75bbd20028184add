//! Config hot-backup and crash recovery.
//!
//! Triggers on `provider_config` snapshot every row mutation into
//! `proxy_live_backup`. Recovery replays the latest snapshot per provider
//! when the previous process died without removing its crash marker.

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use cswitch_common::{Family, ProviderRecord};

use crate::entities;
use crate::store::{RelayStore, StorageError, StorageResult};

pub const BACKUP_RETENTION: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Provider,
    AppSettings,
    Mcp,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Provider => "provider",
            BackupType::AppSettings => "app-settings",
            BackupType::Mcp => "mcp",
        }
    }

    pub fn parse(value: &str) -> Option<BackupType> {
        match value {
            "provider" => Some(BackupType::Provider),
            "app-settings" => Some(BackupType::AppSettings),
            "mcp" => Some(BackupType::Mcp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    AutoInsert,
    AutoUpdate,
    AutoDelete,
    PreUpdate,
    Manual,
    CrashRecovery,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::AutoInsert => "auto_insert",
            TriggerEvent::AutoUpdate => "auto_update",
            TriggerEvent::AutoDelete => "auto_delete",
            TriggerEvent::PreUpdate => "pre_update",
            TriggerEvent::Manual => "manual",
            TriggerEvent::CrashRecovery => "crash_recovery",
        }
    }

    pub fn parse(value: &str) -> Option<TriggerEvent> {
        match value {
            "auto_insert" => Some(TriggerEvent::AutoInsert),
            "auto_update" => Some(TriggerEvent::AutoUpdate),
            "auto_delete" => Some(TriggerEvent::AutoDelete),
            "pre_update" => Some(TriggerEvent::PreUpdate),
            "manual" => Some(TriggerEvent::Manual),
            "crash_recovery" => Some(TriggerEvent::CrashRecovery),
            _ => None,
        }
    }
}

pub type BackupRow = entities::proxy_live_backup::Model;

const PROVIDER_ROW_JSON: &str = "json_object(\
    'id', {R}.id, 'platform', {R}.platform, 'name', {R}.name, \
    'api_url', {R}.api_url, 'api_key', {R}.api_key, \
    'official_url', {R}.official_url, 'icon', {R}.icon, \
    'enabled', {R}.enabled, \
    'supported_models', json({R}.supported_models), \
    'model_mapping', json({R}.model_mapping), \
    'priority_level', {R}.priority_level, 'weight', {R}.weight, \
    'tint', {R}.tint, 'accent', {R}.accent, \
    'created_at', {R}.created_at, 'updated_at', {R}.updated_at)";

fn trigger_ddl(name: &str, event: &str, row_ref: &str, tag: &str) -> String {
    let payload = PROVIDER_ROW_JSON.replace("{R}", row_ref);
    format!(
        "CREATE TRIGGER IF NOT EXISTS {name} AFTER {event} ON provider_config \
         BEGIN \
           INSERT INTO proxy_live_backup \
             (backup_type, backup_data, trigger_event, backup_time, restored, restored_at) \
           VALUES ('provider', {payload}, '{tag}', CURRENT_TIMESTAMP, 0, NULL); \
         END;"
    )
}

/// Idempotent DDL, run after every schema sync.
pub async fn ensure_triggers(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute_unprepared(&trigger_ddl(
        "provider_config_backup_insert",
        "INSERT",
        "NEW",
        "auto_insert",
    ))
    .await?;
    db.execute_unprepared(&trigger_ddl(
        "provider_config_backup_update",
        "UPDATE",
        "NEW",
        "auto_update",
    ))
    .await?;
    db.execute_unprepared(&trigger_ddl(
        "provider_config_backup_delete",
        "DELETE",
        "OLD",
        "auto_delete",
    ))
    .await?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub restored_providers: usize,
    pub deleted_providers: usize,
    pub snapshot_rows_applied: Vec<i64>,
}

impl RelayStore {
    pub async fn list_backups(
        &self,
        backup_type: BackupType,
        limit: u64,
    ) -> StorageResult<Vec<BackupRow>> {
        use entities::proxy_live_backup::Column;
        Ok(entities::ProxyLiveBackup::find()
            .filter(Column::BackupType.eq(backup_type.as_str()))
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(self.connection())
            .await?)
    }

    pub async fn insert_backup(
        &self,
        backup_type: BackupType,
        trigger: TriggerEvent,
        data: JsonValue,
    ) -> StorageResult<i64> {
        let active = entities::proxy_live_backup::ActiveModel {
            id: ActiveValue::NotSet,
            backup_type: ActiveValue::Set(backup_type.as_str().to_string()),
            backup_data: ActiveValue::Set(data),
            trigger_event: ActiveValue::Set(trigger.as_str().to_string()),
            backup_time: ActiveValue::Set(OffsetDateTime::now_utc()),
            restored: ActiveValue::Set(false),
            restored_at: ActiveValue::Set(None),
            ..Default::default()
        };
        let result = entities::ProxyLiveBackup::insert(active)
            .exec(self.connection())
            .await?;
        Ok(result.last_insert_id)
    }

    pub async fn mark_backups_restored(&self, ids: &[i64]) -> StorageResult<()> {
        use entities::proxy_live_backup::Column;
        if ids.is_empty() {
            return Ok(());
        }
        entities::ProxyLiveBackup::update_many()
            .col_expr(Column::Restored, Expr::value(true))
            .col_expr(Column::RestoredAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.is_in(ids.iter().copied()))
            .exec(self.connection())
            .await?;
        Ok(())
    }

    /// Keep the most recent `keep` rows per backup type.
    pub async fn prune_backups(&self, keep: u64) -> StorageResult<u64> {
        use entities::proxy_live_backup::Column;
        let mut removed = 0;
        for backup_type in [BackupType::Provider, BackupType::AppSettings, BackupType::Mcp] {
            let survivors: Vec<i64> = entities::ProxyLiveBackup::find()
                .select_only()
                .column(Column::Id)
                .filter(Column::BackupType.eq(backup_type.as_str()))
                .order_by_desc(Column::Id)
                .limit(keep)
                .into_tuple()
                .all(self.connection())
                .await?;
            let Some(&cutoff) = survivors.last() else {
                continue;
            };
            let result = entities::ProxyLiveBackup::delete_many()
                .filter(Column::BackupType.eq(backup_type.as_str()))
                .filter(Column::Id.lt(cutoff))
                .exec(self.connection())
                .await?;
            removed += result.rows_affected;
        }
        Ok(removed)
    }

    /// Replay the latest provider snapshot per id. A trailing
    /// `auto_delete` means the provider was gone before the crash, so it
    /// stays gone. Applying the same snapshots again is a no-op.
    pub async fn recover_providers(&self) -> StorageResult<RecoveryReport> {
        let rows = self.list_backups(BackupType::Provider, 1000).await?;

        // Rows come newest-first; keep the first row seen per provider id.
        let mut latest: HashMap<i64, &BackupRow> = HashMap::new();
        for row in &rows {
            let Some(provider_id) = row.backup_data.get("id").and_then(JsonValue::as_i64) else {
                continue;
            };
            latest.entry(provider_id).or_insert(row);
        }

        let mut report = RecoveryReport::default();
        for (provider_id, row) in latest {
            match TriggerEvent::parse(&row.trigger_event) {
                Some(TriggerEvent::AutoDelete) => {
                    self.delete_provider(provider_id).await?;
                    report.deleted_providers += 1;
                }
                _ => {
                    let record = provider_from_backup(&row.backup_data)?;
                    self.upsert_provider(&record).await?;
                    report.restored_providers += 1;
                }
            }
            report.snapshot_rows_applied.push(row.id);
        }
        report.snapshot_rows_applied.sort_unstable();
        self.mark_backups_restored(&report.snapshot_rows_applied)
            .await?;

        if report.restored_providers + report.deleted_providers > 0 {
            let restored = self.list_providers().await?;
            let data = serde_json::to_value(&restored)?;
            self.insert_backup(BackupType::Provider, TriggerEvent::CrashRecovery, data)
                .await?;
            info!(
                event = "crash_recovery_applied",
                restored = report.restored_providers,
                deleted = report.deleted_providers
            );
        }
        Ok(report)
    }

    /// Rewrite the app-settings / mcp sidecar files from their latest
    /// snapshots. Missing snapshots leave the files untouched.
    pub async fn restore_sidecars(&self, data_dir: &std::path::Path) -> StorageResult<()> {
        for (backup_type, file_name) in [
            (BackupType::AppSettings, "app-settings.json"),
            (BackupType::Mcp, "mcp.json"),
        ] {
            let rows = self.list_backups(backup_type, 1).await?;
            let Some(row) = rows.first() else {
                continue;
            };
            let path = data_dir.join(file_name);
            let rendered = serde_json::to_string_pretty(&row.backup_data)?;
            if let Err(err) = std::fs::write(&path, rendered) {
                warn!(event = "sidecar_restore_failed", file = %path.display(), error = %err);
                continue;
            }
            self.mark_backups_restored(&[row.id]).await?;
        }
        Ok(())
    }
}

/// Decode the trigger-produced JSON image back into a record. SQLite
/// stores booleans as 0/1 and timestamps as text, so both are coerced.
fn provider_from_backup(data: &JsonValue) -> StorageResult<ProviderRecord> {
    let corrupt = |what: &str| StorageError::Corrupt(format!("backup row missing {what}"));
    let platform_raw = data
        .get("platform")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| corrupt("platform"))?;
    let platform = Family::parse(platform_raw)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown platform {platform_raw:?}")))?;
    Ok(ProviderRecord {
        id: data
            .get("id")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| corrupt("id"))?,
        platform,
        name: json_string(data, "name").ok_or_else(|| corrupt("name"))?,
        api_url: json_string(data, "api_url").ok_or_else(|| corrupt("api_url"))?,
        api_key: json_string(data, "api_key").unwrap_or_default(),
        official_url: json_string(data, "official_url"),
        icon: json_string(data, "icon"),
        enabled: json_bool(data, "enabled"),
        priority_level: data
            .get("priority_level")
            .and_then(JsonValue::as_i64)
            .unwrap_or(5) as i32,
        weight: data.get("weight").and_then(JsonValue::as_i64).unwrap_or(100) as i32,
        supported_models: data
            .get("supported_models")
            .cloned()
            .map(|value| serde_json::from_value(value).unwrap_or_default())
            .unwrap_or_default(),
        model_mapping: data
            .get("model_mapping")
            .cloned()
            .map(|value| serde_json::from_value(value).unwrap_or_default())
            .unwrap_or_default(),
        tint: json_string(data, "tint"),
        accent: json_string(data, "accent"),
        created_at: json_timestamp(data, "created_at"),
        updated_at: json_timestamp(data, "updated_at"),
    })
}

fn json_string(data: &JsonValue, key: &str) -> Option<String> {
    data.get(key)
        .and_then(JsonValue::as_str)
        .map(|value| value.to_string())
}

fn json_bool(data: &JsonValue, key: &str) -> bool {
    match data.get(key) {
        Some(JsonValue::Bool(value)) => *value,
        Some(JsonValue::Number(value)) => value.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn json_timestamp(data: &JsonValue, key: &str) -> OffsetDateTime {
    let Some(raw) = data.get(key).and_then(JsonValue::as_str) else {
        return OffsetDateTime::now_utc();
    };
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return parsed;
    }
    // sqlx's sqlite text layout: "2026-01-15 10:30:00 +00:00"
    let format = time::format_description::parse_owned::<2>(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]] \
         [offset_hour sign:mandatory]:[offset_minute]",
    )
    .ok();
    if let Some(format) = format
        && let Ok(parsed) = OffsetDateTime::parse(raw, &format)
    {
        return parsed;
    }
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_ddl_targets_the_right_rows() {
        let insert = trigger_ddl("t_ins", "INSERT", "NEW", "auto_insert");
        assert!(insert.contains("AFTER INSERT ON provider_config"));
        assert!(insert.contains("NEW.api_url"));
        assert!(insert.contains("'auto_insert'"));

        let delete = trigger_ddl("t_del", "DELETE", "OLD", "auto_delete");
        assert!(delete.contains("OLD.name"));
        assert!(!delete.contains("NEW."));
    }

    #[test]
    fn backup_payload_round_trips_into_record() {
        let data = serde_json::json!({
            "id": 3,
            "platform": "claude",
            "name": "main",
            "api_url": "https://api.example.com",
            "api_key": "sk-x",
            "official_url": null,
            "icon": null,
            "enabled": 1,
            "supported_models": {"claude-*": true},
            "model_mapping": {},
            "priority_level": 2,
            "weight": 100,
            "tint": null,
            "accent": null,
            "created_at": "2026-01-15 10:30:00 +00:00",
            "updated_at": "2026-01-15T10:30:00Z"
        });
        let record = provider_from_backup(&data).unwrap();
        assert_eq!(record.id, 3);
        assert_eq!(record.platform, Family::Claude);
        assert!(record.enabled);
        assert_eq!(record.supported_models.get("claude-*"), Some(&true));
        assert_eq!(record.updated_at.year(), 2026);
    }

    #[test]
    fn trigger_tags_round_trip() {
        for tag in [
            TriggerEvent::AutoInsert,
            TriggerEvent::AutoUpdate,
            TriggerEvent::AutoDelete,
            TriggerEvent::PreUpdate,
            TriggerEvent::Manual,
            TriggerEvent::CrashRecovery,
        ] {
            assert_eq!(TriggerEvent::parse(tag.as_str()), Some(tag));
        }
    }
}
