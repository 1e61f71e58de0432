//! Session-bus side of the pipeline
//!
//! [`LayerSink`] is where forwarded layer changes end up. The D-Bus indicator
//! client is the production sink; tests use in-memory sinks.

#[cfg(feature = "dbus")]
pub mod dbus;
pub mod forward;

#[cfg(feature = "dbus")]
pub use dbus::DbusIndicator;
pub use forward::{spawn_forwarder, ForwardHandle};

use async_trait::async_trait;
use thiserror::Error;

use crate::layer::LayerChanged;

/// Errors talking to the layer indicator
#[derive(Error, Debug)]
pub enum BusError {
    /// Session bus or indicator service not reachable
    #[error("Session bus unavailable: {0}")]
    BusUnavailable(String),
}

/// Consumer of layer changes
#[async_trait]
pub trait LayerSink: Send + Sync {
    /// Show a layer (`SetLayer`)
    async fn set_layer(&self, event: &LayerChanged) -> Result<(), BusError>;
}
