//! hidapi-backed raw HID device

use std::time::Duration;

use hidapi::HidDevice;
use tracing::debug;

use crate::error::TransportError;
use crate::protocol::REPORT_SIZE;
use crate::types::HidInterfaceInfo;
use crate::RawHid;

/// Raw HID interface opened through hidapi
///
/// Dropping the value closes the underlying hidraw handle.
pub struct HidRawDevice {
    device: HidDevice,
    info: HidInterfaceInfo,
}

impl HidRawDevice {
    pub fn new(device: HidDevice, info: HidInterfaceInfo) -> Self {
        Self { device, info }
    }
}

impl RawHid for HidRawDevice {
    fn write_frame(&mut self, frame: &[u8; REPORT_SIZE]) -> Result<(), TransportError> {
        // Report ID 0 precedes the 32-byte report on the wire
        let mut buf = [0u8; REPORT_SIZE + 1];
        buf[1..].copy_from_slice(frame);
        let written = self.device.write(&buf)?;
        check_written(written, buf.len())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = [0u8; REPORT_SIZE];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self.device.read_timeout(&mut buf, timeout_ms)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf[..n].to_vec()))
    }

    fn info(&self) -> &HidInterfaceInfo {
        &self.info
    }
}

/// hidapi counts the report ID byte, so a full write is `expected` bytes
fn check_written(written: usize, expected: usize) -> Result<(), TransportError> {
    if written < expected {
        debug!("Short HID write: {} of {} bytes", written, expected);
        return Err(TransportError::HidError(format!(
            "short write ({written} of {expected} bytes)"
        )));
    }
    Ok(())
}

impl Drop for HidRawDevice {
    fn drop(&mut self) {
        debug!("Closing raw HID device {}", self.info.path);
    }
}
