//! Forward-only schema migrations gated by the `schema_version` table.
//! Entity sync creates missing tables; steps here cover what sync cannot
//! express (indexes, backfills).

use sea_orm::{ActiveValue, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait};
use time::OffsetDateTime;
use tracing::info;

use crate::entities;

pub const CURRENT_VERSION: i32 = 3;

struct Step {
    version: i32,
    statements: &'static [&'static str],
}

static STEPS: &[Step] = &[
    Step {
        version: 2,
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_request_log_created_at ON request_log (created_at)",
            "CREATE INDEX IF NOT EXISTS idx_request_log_trace_id ON request_log (trace_id)",
        ],
    },
    Step {
        version: 3,
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_backup_type_id ON proxy_live_backup (backup_type, id)",
            "CREATE INDEX IF NOT EXISTS idx_body_expires_at ON request_log_body (expires_at)",
        ],
    },
];

pub async fn run(db: &DatabaseConnection) -> Result<(), DbErr> {
    let recorded = entities::SchemaVersion::find_by_id(1)
        .one(db)
        .await?
        .map(|row| row.version)
        .unwrap_or(0);

    if recorded >= CURRENT_VERSION {
        return Ok(());
    }

    for step in STEPS {
        if step.version <= recorded {
            continue;
        }
        for statement in step.statements {
            db.execute_unprepared(statement).await?;
        }
        info!(event = "schema_migrated", version = step.version);
    }

    let active = entities::schema_version::ActiveModel {
        id: ActiveValue::Set(1),
        version: ActiveValue::Set(CURRENT_VERSION),
        applied_at: ActiveValue::Set(OffsetDateTime::now_utc()),
    };
    if recorded == 0 {
        entities::SchemaVersion::insert(active).exec(db).await?;
    } else {
        entities::SchemaVersion::update(active).exec(db).await?;
    }
    Ok(())
}
