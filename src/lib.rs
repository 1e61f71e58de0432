// QMK Layer Bridge - Shared Library
// Layer polling, privilege-separated socket bridge, and session-bus indicator

pub mod backoff;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod indicator;
pub mod layer;
pub mod poller;
pub mod shutdown;

pub use bridge::{BridgeClient, BridgeError, BridgeSender, BridgeServer};
pub use bus::{BusError, LayerSink};
pub use config::{Config, ConfigError};
pub use layer::{LayerChanged, LayerEntry, LayerTable};
pub use poller::{LayerEventSink, LayerPoller, PollerHandle, PollerSettings, PollerState};
