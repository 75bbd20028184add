pub mod adapter;
pub mod breaker;
pub mod engine;
pub mod events;
pub mod forward;
pub mod gate;
pub mod registry;
pub mod route;
pub mod select;

pub use breaker::{Breaker, BreakerManager};
pub use engine::{EngineConfig, InboundMeta, RelayEngine, RelayOutcome};
pub use events::{EventHub, EventSink, RelayEvent};
pub use forward::{Forwarder, ForwarderConfig};
pub use gate::AppGate;
pub use registry::{Registry, RegistryError, RegistrySnapshot};
pub use route::{classify, RouteMatch};
pub use select::Selector;
