//! Raw HID interface discovery for VIA keyboards
//!
//! A keyboard usually exposes several HID interfaces under one VID/PID
//! (keyboard, consumer/system control, mouse keys, raw HID). Only the raw
//! interface on usage page 0xFF60 speaks the VIA protocol, so selection
//! filters on identity first and usage second.

use std::ffi::CString;
use std::time::Duration;

use hidapi::HidApi;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::hid_raw::HidRawDevice;
use crate::protocol::{self, cmd};
use crate::types::{DeviceIdentity, HidInterfaceInfo};
use crate::RawHid;

/// Timeout for the GET_PROTOCOL_VERSION query sent to interfaces with unknown usage
const VERSION_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Source of HID interfaces
///
/// `HidApiEnumerator` is the real implementation; tests inject fakes.
pub trait HidEnumerator: Send {
    /// List every attached HID interface
    fn enumerate(&mut self) -> Result<Vec<HidInterfaceInfo>, TransportError>;

    /// Open one interface
    fn open(&self, info: &HidInterfaceInfo) -> Result<Box<dyn RawHid>, TransportError>;
}

/// Enumerator backed by hidapi
pub struct HidApiEnumerator {
    api: HidApi,
}

impl HidApiEnumerator {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self { api: HidApi::new()? })
    }
}

impl HidEnumerator for HidApiEnumerator {
    fn enumerate(&mut self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        self.api.refresh_devices()?;
        Ok(self.api.device_list().map(HidInterfaceInfo::from).collect())
    }

    fn open(&self, info: &HidInterfaceInfo) -> Result<Box<dyn RawHid>, TransportError> {
        let path = CString::new(info.path.as_str())
            .map_err(|e| TransportError::HidError(format!("invalid device path: {e}")))?;
        let device = self.api.open_path(&path)?;
        debug!("Opened {} ({})", info.path, info.display_name());
        Ok(Box::new(HidRawDevice::new(device, info.clone())))
    }
}

/// What to do when more than one raw interface matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguityPolicy {
    /// Report `DeviceAmbiguous`
    #[default]
    Fail,
    /// Log the ambiguity and take the first interface by device path
    FirstByPath,
}

/// Pick one interface from a candidate list
fn choose(
    mut candidates: Vec<HidInterfaceInfo>,
    identity: &DeviceIdentity,
    policy: AmbiguityPolicy,
) -> Result<HidInterfaceInfo, TransportError> {
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates.dedup_by(|a, b| a.path == b.path);

    match candidates.len() {
        0 => Err(TransportError::DeviceNotFound(format!(
            "no raw HID interface matching {identity}"
        ))),
        1 => Ok(candidates.remove(0)),
        count => {
            let paths: Vec<String> = candidates.iter().map(|c| c.path.clone()).collect();
            match policy {
                AmbiguityPolicy::Fail => Err(TransportError::DeviceAmbiguous { count, paths }),
                AmbiguityPolicy::FirstByPath => {
                    warn!(
                        "{} raw HID interfaces match {}: {}; using {}",
                        count,
                        identity,
                        paths.join(", "),
                        paths[0]
                    );
                    Ok(candidates.remove(0))
                }
            }
        }
    }
}

/// Select the raw HID interface for `identity` from an enumeration
///
/// Interfaces must match vendor/product and the raw usage page/usage.
/// Duplicate entries for the same device path count once.
pub fn select_interface(
    identity: &DeviceIdentity,
    interfaces: &[HidInterfaceInfo],
    policy: AmbiguityPolicy,
) -> Result<HidInterfaceInfo, TransportError> {
    let candidates = interfaces
        .iter()
        .filter(|i| identity.matches(i))
        .cloned()
        .collect();
    choose(candidates, identity, policy)
}

/// Ask an interface for its VIA protocol version; true if it echoes the command
pub fn speaks_via(device: &mut dyn RawHid, timeout: Duration) -> bool {
    let Ok(frame) = protocol::encode_request(cmd::GET_PROTOCOL_VERSION, &[]) else {
        return false;
    };
    if device.write_frame(&frame).is_err() {
        return false;
    }
    match device.read_frame(timeout) {
        Ok(Some(resp)) => protocol::decode_response(&resp)
            .map(|r| r.command == cmd::GET_PROTOCOL_VERSION)
            .unwrap_or(false),
        _ => false,
    }
}

/// Finds and opens the keyboard's raw HID interface
pub struct DeviceLocator<E: HidEnumerator> {
    enumerator: E,
    identity: DeviceIdentity,
}

impl DeviceLocator<HidApiEnumerator> {
    /// Locator over the system's hidapi enumeration
    pub fn system(identity: DeviceIdentity) -> Result<Self, TransportError> {
        Ok(Self::new(HidApiEnumerator::new()?, identity))
    }
}

impl<E: HidEnumerator> DeviceLocator<E> {
    pub fn new(enumerator: E, identity: DeviceIdentity) -> Self {
        Self {
            enumerator,
            identity,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Every HID interface currently attached
    pub fn enumerate_all(&mut self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        self.enumerator.enumerate()
    }

    /// All VIA-capable interfaces matching the identity
    ///
    /// Interfaces reporting usage page 0 (hidraw without a parsed report
    /// descriptor) are asked for their protocol version when nothing reports
    /// the raw usage page.
    pub fn list_candidates(&mut self) -> Result<Vec<HidInterfaceInfo>, TransportError> {
        let interfaces = self.enumerator.enumerate()?;
        let mut candidates: Vec<HidInterfaceInfo> = interfaces
            .iter()
            .filter(|i| self.identity.matches(i))
            .cloned()
            .collect();

        if candidates.is_empty() {
            candidates = self.query_unknown(&interfaces);
        }

        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        candidates.dedup_by(|a, b| a.path == b.path);
        Ok(candidates)
    }

    fn query_unknown(&self, interfaces: &[HidInterfaceInfo]) -> Vec<HidInterfaceInfo> {
        let mut found = Vec::new();
        for iface in interfaces
            .iter()
            .filter(|i| self.identity.matches_ids(i) && i.has_unknown_usage())
        {
            debug!(
                "Probing {:04X}:{:04X} if:{} {}",
                iface.vendor_id, iface.product_id, iface.interface_number, iface.path
            );
            match self.enumerator.open(iface) {
                Ok(mut dev) => {
                    if speaks_via(dev.as_mut(), VERSION_QUERY_TIMEOUT) {
                        debug!("{} answered the VIA version query", iface.path);
                        found.push(iface.clone());
                    }
                }
                Err(e) => debug!("Cannot open {} for probing: {}", iface.path, e),
            }
        }
        found
    }

    /// Find and open the raw interface
    pub fn find_device(
        &mut self,
        policy: AmbiguityPolicy,
    ) -> Result<Box<dyn RawHid>, TransportError> {
        let candidates = self.list_candidates()?;
        let chosen = choose(candidates, &self.identity, policy)?;
        let device = self.enumerator.open(&chosen)?;
        info!(
            "Using {} [{:04X}:{:04X}] at {}",
            chosen.display_name(),
            chosen.vendor_id,
            chosen.product_id,
            chosen.path
        );
        Ok(device)
    }

    /// Open a specific interface, e.g. one returned by `list_candidates`
    pub fn open(&self, info: &HidInterfaceInfo) -> Result<Box<dyn RawHid>, TransportError> {
        self.enumerator.open(info)
    }
}
