pub mod backup;
pub mod db;
pub mod entities;
pub mod migrate;
pub mod store;
pub mod telemetry;

pub use backup::{BackupRow, BackupType, TriggerEvent};
pub use store::{DailyUsageRow, LogFilter, LogPage, RelayStore, StorageError, StorageResult};
pub use telemetry::{TelemetryBus, TelemetryBusConfig};
