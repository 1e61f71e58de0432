//! `poll`: read layer state from the keyboard and publish changes.

use tokio::sync::watch;
use tracing::info;
use via_transport::DeviceLocator;

use qmk_layer_bridge::backoff::Backoff;
use qmk_layer_bridge::shutdown::stopped;
use qmk_layer_bridge::{BridgeClient, Config, LayerEventSink, LayerPoller, PollerSettings};

use super::{shutdown_on_ctrl_c, CommandResult};
use crate::cli::PollMode;

/// Start the poller thread and block until shutdown, then stop it
async fn poll_until_shutdown(
    config: &Config,
    sink: Box<dyn LayerEventSink>,
    shutdown: &mut watch::Receiver<bool>,
) -> CommandResult {
    let locator = DeviceLocator::system(config.device.identity)?;
    let poller = LayerPoller::new(
        locator,
        PollerSettings::from(config),
        config.layer_table()?,
        sink,
    );
    let handle = poller.spawn()?;

    stopped(shutdown).await;
    tokio::task::spawn_blocking(move || handle.stop()).await?;
    Ok(())
}

pub async fn run(config: &Config, mode: PollMode) -> CommandResult {
    let euid = unsafe { libc::geteuid() };
    let mode = mode.resolve(euid);
    info!("Publishing layer changes in {} mode (euid {})", mode.as_str(), euid);

    let mut shutdown = shutdown_on_ctrl_c();
    match mode {
        PollMode::Auto | PollMode::Bridge => {
            let client = BridgeClient::start(
                config.bridge.socket_path.clone(),
                Backoff::new(
                    config.bridge.reconnect_initial(),
                    config.bridge.reconnect_max(),
                ),
            );
            let result =
                poll_until_shutdown(config, Box::new(client.sender()), &mut shutdown).await;
            client.stop().await;
            result
        }
        PollMode::Direct => direct(config, shutdown).await,
    }
}

#[cfg(feature = "dbus")]
async fn direct(config: &Config, mut shutdown: watch::Receiver<bool>) -> CommandResult {
    use qmk_layer_bridge::bus::{spawn_forwarder, DbusIndicator};
    use std::sync::Arc;

    let sink = Arc::new(DbusIndicator::new(config.bus.clone()));
    let (forward, task) = spawn_forwarder(sink, shutdown.clone());
    let result = poll_until_shutdown(config, Box::new(forward), &mut shutdown).await;
    task.await?;
    result
}

#[cfg(not(feature = "dbus"))]
async fn direct(_config: &Config, _shutdown: watch::Receiver<bool>) -> CommandResult {
    anyhow::bail!("direct mode needs the `dbus` feature")
}
