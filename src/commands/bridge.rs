//! `bridge`: accept layer changes on the socket and show them on the bus.

use qmk_layer_bridge::Config;

use super::CommandResult;

#[cfg(feature = "dbus")]
pub async fn run(config: &Config) -> CommandResult {
    use qmk_layer_bridge::bus::DbusIndicator;
    use qmk_layer_bridge::BridgeServer;
    use std::sync::Arc;
    use tracing::{info, warn};

    let sink = match DbusIndicator::connect(config.bus.clone()).await {
        Ok(sink) => sink,
        Err(e) => {
            // Calls reconnect on their own once the bus is back
            warn!("{}; continuing", e);
            DbusIndicator::new(config.bus.clone())
        }
    };

    let server = BridgeServer::bind(&config.bridge.socket_path, config.bridge.socket_mode).await?;
    info!("Forwarding to {} on the session bus", config.bus.name);
    server.run(Arc::new(sink), super::shutdown_on_ctrl_c()).await;
    Ok(())
}

#[cfg(not(feature = "dbus"))]
pub async fn run(_config: &Config) -> CommandResult {
    anyhow::bail!("the bridge needs the `dbus` feature")
}
