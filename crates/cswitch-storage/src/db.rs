use std::sync::{OnceLock, RwLock};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Small pool: one writer plus a few readers is plenty for a
/// personal-scale gateway. sqlx's sqlite driver carries a 5 s busy
/// timeout by default.
const MAX_CONNECTIONS: u32 = 4;

struct SharedDb {
    dsn: String,
    connection: DatabaseConnection,
}

static SHARED_DB: OnceLock<RwLock<Option<SharedDb>>> = OnceLock::new();

/// One connection pool per process per DSN. Re-connecting with the same
/// DSN hands back the cached pool.
pub async fn connect_shared(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    let lock = SHARED_DB.get_or_init(|| RwLock::new(None));
    if let Ok(guard) = lock.read()
        && let Some(shared) = guard.as_ref()
        && shared.dsn == dsn
    {
        return Ok(shared.connection.clone());
    }

    let mut options = ConnectOptions::new(dsn);
    options.max_connections(MAX_CONNECTIONS);
    let connection = Database::connect(options).await?;
    if let Ok(mut guard) = lock.write() {
        *guard = Some(SharedDb {
            dsn: dsn.to_string(),
            connection: connection.clone(),
        });
    }
    Ok(connection)
}
