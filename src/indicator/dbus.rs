//! D-Bus interface of the stand-in indicator.
//!
//! Interface: `com.qmk.LayerIndicator`
//! - `SetLayer(s layer_name, s layer_color)`
//! - `GetLayer() -> (s, s)`

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;
use zbus::interface;

use super::state::IndicatorState;
use crate::layer::{is_hex_color, LayerChanged};

/// Shared between the D-Bus interface and the staleness watcher.
pub type SharedState = Arc<Mutex<IndicatorState>>;

pub struct LayerIndicatorInterface {
    state: SharedState,
}

impl LayerIndicatorInterface {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[interface(name = "com.qmk.LayerIndicator")]
impl LayerIndicatorInterface {
    /// Show a layer.
    async fn set_layer(&self, layer_name: &str, layer_color: &str) -> zbus::fdo::Result<()> {
        if !is_hex_color(layer_color) {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "layer color '{layer_color}' is not #RRGGBB"
            )));
        }
        let mut state = self.state.lock().await;
        if state.current().layer_name != layer_name || state.current().layer_color != layer_color {
            info!("Layer: {} ({})", layer_name, layer_color);
        }
        state.set(LayerChanged::new(layer_name, layer_color), Instant::now());
        Ok(())
    }

    /// Currently shown layer name and color.
    async fn get_layer(&self) -> (String, String) {
        let state = self.state.lock().await;
        let current = state.current();
        (current.layer_name.clone(), current.layer_color.clone())
    }
}
