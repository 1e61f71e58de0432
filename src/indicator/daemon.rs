//! Stand-in indicator daemon: bus name owner + staleness watcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use super::dbus::{LayerIndicatorInterface, SharedState};
use super::state::IndicatorState;
use crate::config::BusConfig;
use crate::layer::LayerTable;
use crate::shutdown::stopped;

/// How often the staleness window is checked
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Serve the indicator until `shutdown` turns true.
///
/// Owns `bus.name` on the session bus for the lifetime of the call; the name
/// is released when the connection drops.
pub async fn run(
    bus: &BusConfig,
    table: &LayerTable,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), zbus::Error> {
    if bus.interface != "com.qmk.LayerIndicator" {
        warn!(
            "Stand-in indicator always serves com.qmk.LayerIndicator, not {}",
            bus.interface
        );
    }

    let state: SharedState = Arc::new(Mutex::new(IndicatorState::new(table, bus.stale_after())));
    let conn = zbus::connection::Builder::session()?
        .name(bus.name.as_str())?
        .serve_at(bus.path.as_str(), LayerIndicatorInterface::new(Arc::clone(&state)))?
        .build()
        .await?;
    info!("Indicator: {} at {} on the session bus", bus.name, bus.path);

    let mut ticker = tokio::time::interval(STALE_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                let mut state = state.lock().await;
                if state.take_stale(Instant::now()) {
                    info!(
                        "Layer {} is stale, no update in {:?}",
                        state.current(),
                        bus.stale_after().unwrap_or_default()
                    );
                }
            }
        }
    }

    drop(conn);
    info!("Indicator stopped");
    Ok(())
}
