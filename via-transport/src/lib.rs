//! Raw HID transport for VIA-enabled QMK keyboards
//!
//! This crate covers everything below the request/response client:
//!
//! - locating the keyboard's raw HID interface among its siblings
//! - the fixed 32-byte VIA frame codec
//! - a blocking, timeout-bounded raw HID device abstraction

pub mod error;
pub mod protocol;
pub mod types;

mod discovery;
mod hid_raw;

pub use discovery::{
    select_interface, speaks_via, AmbiguityPolicy, DeviceLocator, HidApiEnumerator, HidEnumerator,
};
pub use error::{ProtocolError, TransportError};
pub use hid_raw::HidRawDevice;
pub use protocol::{decode_response, encode_request, ViaResponse, REPORT_SIZE};
pub use types::{DeviceIdentity, HidInterfaceInfo};

use std::time::Duration;

/// An open raw HID interface
///
/// One value is one exclusive device session: it is owned by a single client
/// and closed when dropped. All calls block; reads are bounded by `timeout`.
pub trait RawHid: Send {
    /// Write one report (without report ID)
    fn write_frame(&mut self, frame: &[u8; REPORT_SIZE]) -> Result<(), TransportError>;

    /// Read one input report
    ///
    /// Returns `None` if nothing arrived within `timeout`. A zero timeout
    /// polls without blocking.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Interface this handle was opened from
    fn info(&self) -> &HidInterfaceInfo;
}
