mod error;
mod family;
pub mod health;
pub mod pattern;
mod provider;
mod telemetry;

pub use error::{ErrorKind, RelayError};
pub use family::{Family, SchemaKind};
pub use health::{BreakerSettings, CircuitState, HealthSink, HealthSnapshot, NoopHealthSink};
pub use provider::{ProviderDraft, ProviderRecord};
pub use telemetry::{BodyLogEvent, NoopTelemetrySink, RequestLogEvent, TelemetrySink};
