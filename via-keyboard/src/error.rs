//! Keyboard interface error types

use thiserror::Error;
use via_transport::{ProtocolError, TransportError};

/// Errors from keyboard operations
#[derive(Error, Debug)]
pub enum KeyboardError {
    /// No response within the request timeout, or the handle failed
    #[error("Device unresponsive: {0}")]
    DeviceUnresponsive(String),

    /// Device is gone from enumeration
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Response frame could not be decoded or echoed the wrong command
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Frame decoded but its contents make no sense for the request
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl KeyboardError {
    /// Whether the session handle should be dropped and the device re-acquired
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            KeyboardError::DeviceUnresponsive(_) | KeyboardError::DeviceNotFound(_)
        )
    }

    /// The firmware answered 0xFF: it has no handler for the request
    pub fn is_unhandled(&self) -> bool {
        matches!(self, KeyboardError::Protocol(ProtocolError::Unhandled(_)))
    }
}

impl From<TransportError> for KeyboardError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Protocol(p) => KeyboardError::Protocol(p),
            TransportError::DeviceNotFound(_) | TransportError::DeviceAmbiguous { .. } => {
                KeyboardError::DeviceNotFound(e.to_string())
            }
            TransportError::Timeout
            | TransportError::Disconnected
            | TransportError::HidError(_)
            | TransportError::HidPermissionDenied(_) => {
                KeyboardError::DeviceUnresponsive(e.to_string())
            }
        }
    }
}
