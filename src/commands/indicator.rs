//! `indicator-test` and `serve-indicator`.

use qmk_layer_bridge::Config;

use super::CommandResult;

/// Read the indicator's layer, then show every table entry for a second.
#[cfg(feature = "dbus")]
pub async fn test(config: &Config) -> CommandResult {
    use qmk_layer_bridge::bus::DbusIndicator;
    use qmk_layer_bridge::{LayerChanged, LayerSink};
    use std::time::Duration;

    let indicator = DbusIndicator::connect(config.bus.clone()).await?;
    let current = indicator.get_layer().await?;
    println!("Indicator shows: {current}");

    let table = config.layer_table()?;
    for entry in table.entries() {
        let event = LayerChanged::from(entry);
        println!("  -> {event}");
        indicator.set_layer(&event).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("Restoring {current}");
    indicator.set_layer(&current).await?;
    Ok(())
}

/// Own the indicator bus name until Ctrl-C.
#[cfg(feature = "dbus")]
pub async fn serve(config: &Config) -> CommandResult {
    let table = config.layer_table()?;
    qmk_layer_bridge::indicator::daemon::run(&config.bus, &table, super::shutdown_on_ctrl_c())
        .await?;
    Ok(())
}

#[cfg(not(feature = "dbus"))]
pub async fn test(_config: &Config) -> CommandResult {
    anyhow::bail!("indicator-test needs the `dbus` feature")
}

#[cfg(not(feature = "dbus"))]
pub async fn serve(_config: &Config) -> CommandResult {
    anyhow::bail!("serve-indicator needs the `dbus` feature")
}
