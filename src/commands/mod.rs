//! Command handlers for the CLI application.
//!
//! - `poll`: privileged layer poller (bridge or direct publishing)
//! - `bridge`: session-side socket bridge
//! - `list`, `layer`: one-shot keyboard queries
//! - `indicator`: indicator test client and stand-in indicator

pub mod bridge;
pub mod indicator;
pub mod layer;
pub mod list;
pub mod poll;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use via_keyboard::ViaKeyboard;
use via_transport::{AmbiguityPolicy, DeviceLocator};

use qmk_layer_bridge::Config;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Shutdown flag that turns true on Ctrl-C
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                // Keep the sender alive so receivers do not see a shutdown
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Open the configured keyboard for one-shot queries
pub fn open_keyboard(config: &Config) -> anyhow::Result<ViaKeyboard> {
    let mut locator = DeviceLocator::system(config.device.identity)?;
    let device = locator
        .find_device(AmbiguityPolicy::FirstByPath)
        .with_context(|| format!("no keyboard matching {}", config.device.identity))?;
    Ok(ViaKeyboard::new(device)
        .with_timeout(config.device.request_timeout())
        .with_layer_channel(config.device.layer_channel))
}
