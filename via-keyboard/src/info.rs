//! Keyboard information types

use std::fmt;

use via_transport::HidInterfaceInfo;

/// Layer state as reported by the keymap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LayerState {
    /// Highest layer set in `layer_state`
    pub active_layer: u8,
    /// Highest layer set in `default_layer_state`
    pub default_layer: u8,
}

impl LayerState {
    pub fn new(active_layer: u8, default_layer: u8) -> Self {
        Self {
            active_layer,
            default_layer,
        }
    }

    /// Layer the keyboard is actually resolving keys on
    ///
    /// QMK picks the highest layer across both states.
    pub fn effective_layer(&self) -> u8 {
        self.active_layer.max(self.default_layer)
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active {} default {}",
            self.active_layer, self.default_layer
        )
    }
}

/// Format a millisecond uptime the way humans read it (e.g. "2.5 hours")
pub fn format_uptime(uptime_ms: u32) -> String {
    let seconds = f64::from(uptime_ms) / 1000.0;
    let minutes = seconds / 60.0;
    let hours = minutes / 60.0;
    let days = hours / 24.0;

    if days >= 1.0 {
        format!("{days:.1} days")
    } else if hours >= 1.0 {
        format!("{hours:.1} hours")
    } else if minutes >= 1.0 {
        format!("{minutes:.1} minutes")
    } else {
        format!("{seconds:.1} seconds")
    }
}

/// Everything `query_info` could learn about a keyboard
///
/// Fields are `None` when the firmware does not answer that query.
#[derive(Debug, Clone)]
pub struct KeyboardInfo {
    pub interface: HidInterfaceInfo,
    pub protocol_version: Option<u16>,
    pub uptime_ms: Option<u32>,
    pub firmware_version: Option<u32>,
    pub layout_options: Option<u32>,
    pub layer_count: Option<u8>,
    pub macro_count: Option<u8>,
    pub macro_buffer_size: Option<u16>,
}

impl KeyboardInfo {
    pub fn new(interface: HidInterfaceInfo) -> Self {
        Self {
            interface,
            protocol_version: None,
            uptime_ms: None,
            firmware_version: None,
            layout_options: None,
            layer_count: None,
            macro_count: None,
            macro_buffer_size: None,
        }
    }
}

fn or_na<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

impl fmt::Display for KeyboardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.interface;
        writeln!(f, "{}", "=".repeat(70))?;
        writeln!(f, "Device: {}", iface.display_name())?;
        writeln!(f, "USB ID: {:04X}:{:04X}", iface.vendor_id, iface.product_id)?;
        if let Some(serial) = iface.serial.as_deref().filter(|s| !s.is_empty()) {
            writeln!(f, "Serial: {serial}")?;
        }
        writeln!(f, "Path: {}", iface.path)?;
        writeln!(f, "{}", "-".repeat(70))?;

        match self.protocol_version {
            Some(v) => writeln!(f, "VIA Protocol Version: 0x{v:04X} (v{v})")?,
            None => writeln!(f, "VIA Protocol Version: Failed to query")?,
        }
        match self.firmware_version {
            Some(0) => writeln!(f, "Firmware Version: Not set (0x00000000)")?,
            Some(v) => writeln!(f, "Firmware Version: 0x{v:08X}")?,
            None => writeln!(f, "Firmware Version: N/A")?,
        }
        match self.uptime_ms {
            Some(ms) => {
                writeln!(f, "Uptime: {}", format_uptime(ms))?;
                writeln!(f, "        ({ms} ms)")?;
            }
            None => writeln!(f, "Uptime: N/A")?,
        }
        match self.layout_options {
            Some(v) => writeln!(f, "Layout Options: 0x{v:08X}")?,
            None => writeln!(f, "Layout Options: N/A")?,
        }
        writeln!(f, "Layer Count: {}", or_na(self.layer_count))?;
        writeln!(f, "Macro Count: {}", or_na(self.macro_count))?;
        match self.macro_buffer_size {
            Some(v) => writeln!(f, "Macro Buffer Size: {v} bytes")?,
            None => writeln!(f, "Macro Buffer Size: N/A")?,
        }
        write!(f, "{}", "=".repeat(70))
    }
}
