use std::fs::OpenOptions;
use std::path::Path;

/// Resolve the sqlite DSN for `app.db` under the data dir, creating the
/// file so sqlx can open it read-write.
pub(crate) fn resolve_dsn(data_dir: &Path) -> std::io::Result<String> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("app.db");
    if !db_path.exists() {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&db_path)?;
    }
    let db_path = db_path.to_string_lossy();
    let dsn = if db_path.starts_with('/') {
        format!("sqlite:///{}", db_path.trim_start_matches('/'))
    } else {
        format!("sqlite://{db_path}")
    };
    Ok(dsn)
}
