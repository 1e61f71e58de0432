//! Transport error types

use thiserror::Error;

/// Errors from decoding a VIA response frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame has the wrong size, an empty command byte, or oversized arguments
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Response echoed a different command than the one requested
    #[error("Protocol mismatch: expected cmd 0x{expected:02X}, got 0x{actual:02X}")]
    ProtocolMismatch { expected: u8, actual: u8 },

    /// Firmware answered with `id_unhandled` (0xFF)
    #[error("Command 0x{0:02X} not handled by firmware")]
    Unhandled(u8),
}

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Ambiguous device match: {count} raw HID interfaces ({})", paths.join(", "))]
    DeviceAmbiguous { count: usize, paths: Vec<String> },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}
