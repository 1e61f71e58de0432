//! Common types for transport layer

use serde::{Deserialize, Serialize};

use crate::protocol::{VIA_USAGE, VIA_USAGE_PAGE};

/// Identity used to pick the keyboard's raw HID interface out of enumeration.
///
/// `vendor_id`/`product_id` left as `None` match any keyboard that exposes the
/// raw usage page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: Option<u16>,
    /// USB Product ID
    pub product_id: Option<u16>,
    /// HID usage page of the raw interface (VIA: 0xFF60)
    pub usage_page: u16,
    /// HID usage of the raw interface (VIA: 0x61)
    pub usage: u16,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            usage_page: VIA_USAGE_PAGE,
            usage: VIA_USAGE,
        }
    }
}

impl DeviceIdentity {
    /// Identity for a specific VID/PID on the VIA raw interface
    pub const fn via(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            usage_page: VIA_USAGE_PAGE,
            usage: VIA_USAGE,
        }
    }

    /// Vendor/product match, ignoring usage
    pub fn matches_ids(&self, info: &HidInterfaceInfo) -> bool {
        self.vendor_id.is_none_or(|vid| vid == info.vendor_id)
            && self.product_id.is_none_or(|pid| pid == info.product_id)
    }

    /// Full match including the raw usage page/usage
    pub fn matches(&self, info: &HidInterfaceInfo) -> bool {
        self.matches_ids(info) && info.usage_page == self.usage_page && info.usage == self.usage
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => write!(f, "{vid:04X}:{pid:04X}")?,
            (Some(vid), None) => write!(f, "{vid:04X}:*")?,
            (None, Some(pid)) => write!(f, "*:{pid:04X}")?,
            (None, None) => f.write_str("*:*")?,
        }
        write!(f, " usage {:04X}:{:02X}", self.usage_page, self.usage)
    }
}

/// One enumerated HID interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidInterfaceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    pub interface_number: i32,
    /// Platform device path (hidraw node on Linux)
    pub path: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

impl HidInterfaceInfo {
    /// hidraw reports usage page 0 when it could not parse the descriptor
    pub fn has_unknown_usage(&self) -> bool {
        self.usage_page == 0
    }

    /// "Manufacturer Product" with fallbacks
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.manufacturer.as_deref().unwrap_or("Unknown"),
            self.product.as_deref().unwrap_or("Unknown")
        )
    }
}

impl From<&hidapi::DeviceInfo> for HidInterfaceInfo {
    fn from(d: &hidapi::DeviceInfo) -> Self {
        Self {
            vendor_id: d.vendor_id(),
            product_id: d.product_id(),
            usage_page: d.usage_page(),
            usage: d.usage(),
            interface_number: d.interface_number(),
            path: d.path().to_string_lossy().to_string(),
            manufacturer: d.manufacturer_string().map(|s| s.to_string()),
            product: d.product_string().map(|s| s.to_string()),
            serial: d.serial_number().map(|s| s.to_string()),
        }
    }
}
