//! D-Bus client for the layer indicator
//!
//! Calls `SetLayer(ss)` / `GetLayer() -> (ss)` on the configured bus name,
//! object path and interface.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BusError, LayerSink};
use crate::config::BusConfig;
use crate::layer::LayerChanged;

impl From<zbus::Error> for BusError {
    fn from(e: zbus::Error) -> Self {
        BusError::BusUnavailable(e.to_string())
    }
}

/// Indicator proxy on the session bus
///
/// The proxy is built lazily and rebuilt once after a failed call, so a
/// restarted session bus or indicator is picked up without restarting.
pub struct DbusIndicator {
    bus: BusConfig,
    proxy: Mutex<Option<zbus::Proxy<'static>>>,
}

impl DbusIndicator {
    pub fn new(bus: BusConfig) -> Self {
        Self {
            bus,
            proxy: Mutex::new(None),
        }
    }

    /// Connect up front so a missing session bus is reported early
    pub async fn connect(bus: BusConfig) -> Result<Self, BusError> {
        let indicator = Self::new(bus);
        let proxy = indicator.build_proxy().await?;
        *indicator.proxy.lock().await = Some(proxy);
        Ok(indicator)
    }

    async fn build_proxy(&self) -> Result<zbus::Proxy<'static>, BusError> {
        let conn = zbus::Connection::session().await?;
        let proxy = zbus::Proxy::new_owned(
            conn,
            self.bus.name.clone(),
            self.bus.path.clone(),
            self.bus.interface.clone(),
        )
        .await?;
        debug!("Indicator proxy for {} at {}", self.bus.name, self.bus.path);
        Ok(proxy)
    }

    async fn proxy(&self) -> Result<zbus::Proxy<'static>, BusError> {
        let mut cached = self.proxy.lock().await;
        if let Some(proxy) = cached.as_ref() {
            return Ok(proxy.clone());
        }
        let proxy = self.build_proxy().await?;
        *cached = Some(proxy.clone());
        Ok(proxy)
    }

    async fn invalidate(&self) {
        *self.proxy.lock().await = None;
    }

    async fn try_set_layer(&self, event: &LayerChanged) -> Result<(), BusError> {
        let proxy = self.proxy().await?;
        proxy
            .call_method("SetLayer", &(event.layer_name.as_str(), event.layer_color.as_str()))
            .await?;
        Ok(())
    }

    /// Layer currently shown by the indicator
    pub async fn get_layer(&self) -> Result<LayerChanged, BusError> {
        let proxy = self.proxy().await?;
        let reply = match proxy.call_method("GetLayer", &()).await {
            Ok(reply) => reply,
            Err(e) => {
                self.invalidate().await;
                return Err(e.into());
            }
        };
        let (name, color): (String, String) = reply.body().deserialize()?;
        Ok(LayerChanged::new(name, color))
    }
}

#[async_trait]
impl LayerSink for DbusIndicator {
    async fn set_layer(&self, event: &LayerChanged) -> Result<(), BusError> {
        match self.try_set_layer(event).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("SetLayer failed ({}), reconnecting", first);
                self.invalidate().await;
                self.try_set_layer(event).await
            }
        }
    }
}
