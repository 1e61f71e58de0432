//! High-level interface for VIA-enabled QMK keyboards
//!
//! This crate wraps an open raw HID handle with correlated VIA
//! request/response exchanges: layer state for the poller, plus the
//! informational queries used by the `list` and `layer` commands.
//!
//! Keymaps without the layer query can still be followed through the
//! switch matrix and keymap buffer ([`matrix`], [`tracker`]).

pub mod error;
pub mod info;
pub mod matrix;
pub mod tracker;

pub use error::KeyboardError;
pub use info::{format_uptime, KeyboardInfo, LayerState};
pub use matrix::{Keymap, MatrixGeometry, SwitchMatrix};
pub use tracker::{LayerKey, LayerTracker};

use std::time::{Duration, Instant};

use tracing::{debug, trace};
use matrix::KEYMAP_CHUNK;
use via_transport::protocol::{cmd, keyboard_value, layer_value};
use via_transport::{decode_response, encode_request, HidInterfaceInfo, RawHid, ViaResponse};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on stale reports discarded before a request
const MAX_DRAIN: usize = 16;

/// VIA protocol client over one exclusive device handle
///
/// Every call is one blocking round trip. There is never more than one
/// request in flight, which `&mut self` enforces.
pub struct ViaKeyboard {
    device: Box<dyn RawHid>,
    timeout: Duration,
    layer_channel: u8,
}

impl ViaKeyboard {
    /// Wrap an open device with the default timeout and layer channel
    pub fn new(device: Box<dyn RawHid>) -> Self {
        Self {
            device,
            timeout: DEFAULT_TIMEOUT,
            layer_channel: layer_value::DEFAULT_CHANNEL,
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the CUSTOM_GET_VALUE channel the keymap answers layer queries on
    pub fn with_layer_channel(mut self, channel: u8) -> Self {
        self.layer_channel = channel;
        self
    }

    /// Interface the handle was opened from
    pub fn interface(&self) -> &HidInterfaceInfo {
        self.device.info()
    }

    /// Discard input reports left over from an earlier, abandoned exchange
    fn drain_stale(&mut self) -> Result<(), KeyboardError> {
        for _ in 0..MAX_DRAIN {
            match self.device.read_frame(Duration::ZERO)? {
                Some(frame) => {
                    trace!("Discarding stale report: {:02X?}", &frame[..frame.len().min(4)])
                }
                None => return Ok(()),
            }
        }
        debug!("Stale report drain hit its limit");
        Ok(())
    }

    /// One request/response exchange
    ///
    /// Fails with `DeviceUnresponsive` if no report arrives before the
    /// timeout, and with `Protocol` if the reply does not echo `command`.
    pub fn query(&mut self, command: u8, args: &[u8]) -> Result<ViaResponse, KeyboardError> {
        let frame = encode_request(command, args)?;
        self.drain_stale()?;
        self.device.write_frame(&frame)?;
        trace!("Sent {} {:02X?}", cmd::name(command), args);

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(KeyboardError::DeviceUnresponsive(format!(
                    "no response to {} within {:?}",
                    cmd::name(command),
                    self.timeout
                )));
            }
            if let Some(raw) = self.device.read_frame(remaining)? {
                let resp = decode_response(&raw)?;
                resp.expect_command(command)?;
                return Ok(resp);
            }
        }
    }

    fn custom_get_layer(&mut self, value_id: u8) -> Result<u8, KeyboardError> {
        let channel = self.layer_channel;
        let resp = self.query(cmd::CUSTOM_GET_VALUE, &[channel, value_id])?;
        if resp.payload[0] != channel || resp.payload[1] != value_id {
            return Err(KeyboardError::UnexpectedResponse(format!(
                "layer query for channel {channel} value {value_id} \
                 answered with channel {} value {}",
                resp.payload[0], resp.payload[1]
            )));
        }
        Ok(resp.payload[2])
    }

    /// Highest active layer
    pub fn get_active_layer(&mut self) -> Result<u8, KeyboardError> {
        self.custom_get_layer(layer_value::ACTIVE_LAYER)
    }

    /// Highest default layer
    pub fn get_default_layer(&mut self) -> Result<u8, KeyboardError> {
        self.custom_get_layer(layer_value::DEFAULT_LAYER)
    }

    /// Active and default layer, in that order
    pub fn get_layer_state(&mut self) -> Result<LayerState, KeyboardError> {
        let active_layer = self.get_active_layer()?;
        let default_layer = self.get_default_layer()?;
        Ok(LayerState {
            active_layer,
            default_layer,
        })
    }

    // === Switch Matrix / Keymap ===

    /// Pressed state of every switch
    ///
    /// Large matrices take several requests, each starting at a row offset.
    pub fn get_switch_matrix(
        &mut self,
        geometry: MatrixGeometry,
    ) -> Result<SwitchMatrix, KeyboardError> {
        let mut matrix = SwitchMatrix::released(geometry);
        let step = geometry.rows_per_query();
        for offset in (0..geometry.rows).step_by(step) {
            let id = keyboard_value::SWITCH_MATRIX_STATE;
            let resp = self.query(cmd::GET_KEYBOARD_VALUE, &[id, offset])?;
            if resp.payload[0] != id || resp.payload[1] != offset {
                return Err(KeyboardError::UnexpectedResponse(format!(
                    "switch matrix rows from {offset} answered as value 0x{:02X} offset {}",
                    resp.payload[0], resp.payload[1]
                )));
            }
            let len = (step * geometry.bytes_per_row()).min(resp.payload.len() - 2);
            matrix.fill_rows(usize::from(offset), &resp.payload[2..2 + len]);
        }
        Ok(matrix)
    }

    /// Read `size` bytes of the keymap buffer at `offset`
    pub fn get_keymap_buffer(&mut self, offset: u16, size: u8) -> Result<Vec<u8>, KeyboardError> {
        let size = usize::from(size).min(KEYMAP_CHUNK);
        let [hi, lo] = offset.to_be_bytes();
        let resp = self.query(cmd::GET_KEYMAP_BUFFER, &[hi, lo, size as u8])?;
        if resp.u16_at(0) != offset {
            return Err(KeyboardError::UnexpectedResponse(format!(
                "keymap buffer at {offset} answered for offset {}",
                resp.u16_at(0)
            )));
        }
        Ok(resp.payload[3..3 + size].to_vec())
    }

    /// Keycodes of every layer
    pub fn get_keymap(&mut self, geometry: MatrixGeometry) -> Result<Keymap, KeyboardError> {
        let layer_count = self.get_layer_count()?;
        let total = Keymap::buffer_len(geometry, layer_count);
        if total > usize::from(u16::MAX) {
            return Err(KeyboardError::UnexpectedResponse(format!(
                "{layer_count} layers of {geometry} exceed the keymap buffer"
            )));
        }

        let mut buffer = Vec::with_capacity(total);
        while buffer.len() < total {
            let chunk = (total - buffer.len()).min(KEYMAP_CHUNK);
            buffer.extend(self.get_keymap_buffer(buffer.len() as u16, chunk as u8)?);
        }
        debug!("Read {} layers of {} keymap", layer_count, geometry);
        Ok(Keymap::from_buffer(geometry, layer_count, &buffer))
    }

    // === Device Info ===

    pub fn get_protocol_version(&mut self) -> Result<u16, KeyboardError> {
        let resp = self.query(cmd::GET_PROTOCOL_VERSION, &[])?;
        Ok(resp.u16_at(0))
    }

    fn get_keyboard_value(&mut self, id: u8) -> Result<u32, KeyboardError> {
        let resp = self.query(cmd::GET_KEYBOARD_VALUE, &[id])?;
        if resp.payload[0] != id {
            return Err(KeyboardError::UnexpectedResponse(format!(
                "keyboard value 0x{id:02X} answered as 0x{:02X}",
                resp.payload[0]
            )));
        }
        Ok(resp.u32_at(1))
    }

    /// Milliseconds since the keyboard booted
    pub fn get_uptime(&mut self) -> Result<u32, KeyboardError> {
        self.get_keyboard_value(keyboard_value::UPTIME)
    }

    pub fn get_firmware_version(&mut self) -> Result<u32, KeyboardError> {
        self.get_keyboard_value(keyboard_value::FIRMWARE_VERSION)
    }

    pub fn get_layout_options(&mut self) -> Result<u32, KeyboardError> {
        self.get_keyboard_value(keyboard_value::LAYOUT_OPTIONS)
    }

    pub fn get_layer_count(&mut self) -> Result<u8, KeyboardError> {
        Ok(self.query(cmd::GET_LAYER_COUNT, &[])?.payload[0])
    }

    pub fn get_macro_count(&mut self) -> Result<u8, KeyboardError> {
        Ok(self.query(cmd::GET_MACRO_COUNT, &[])?.payload[0])
    }

    /// Macro buffer size in bytes
    pub fn get_macro_buffer_size(&mut self) -> Result<u16, KeyboardError> {
        Ok(self.query(cmd::GET_MACRO_BUFFER_SIZE, &[])?.u16_at(0))
    }

    /// Run every informational query
    ///
    /// Queries the firmware rejects are left as `None`; losing the device
    /// aborts with the error.
    pub fn query_info(&mut self) -> Result<KeyboardInfo, KeyboardError> {
        let mut info = KeyboardInfo::new(self.interface().clone());
        info.protocol_version = optional(self.get_protocol_version())?;
        info.uptime_ms = optional(self.get_uptime())?;
        info.firmware_version = optional(self.get_firmware_version())?;
        info.layout_options = optional(self.get_layout_options())?;
        info.layer_count = optional(self.get_layer_count())?;
        info.macro_count = optional(self.get_macro_count())?;
        info.macro_buffer_size = optional(self.get_macro_buffer_size())?;
        Ok(info)
    }
}

fn optional<T>(result: Result<T, KeyboardError>) -> Result<Option<T>, KeyboardError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_disconnect() => Err(e),
        Err(e) => {
            debug!("Query skipped: {}", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use via_transport::protocol::REPORT_SIZE;
    use via_transport::{ProtocolError, TransportError};

    /// Scripted device: each written request pops the next reply
    struct FakeHid {
        info: HidInterfaceInfo,
        stale: VecDeque<Vec<u8>>,
        replies: VecDeque<Option<Vec<u8>>>,
        pending: Option<Vec<u8>>,
        sent: Arc<Mutex<Vec<[u8; REPORT_SIZE]>>>,
        fail_io: bool,
    }

    impl FakeHid {
        fn new(replies: Vec<Option<Vec<u8>>>) -> (Self, Sent) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let fake = Self {
                info: HidInterfaceInfo {
                    vendor_id: 0x4653,
                    product_id: 0x0001,
                    usage_page: 0xFF60,
                    usage: 0x61,
                    interface_number: 1,
                    path: "/dev/hidraw7".into(),
                    manufacturer: None,
                    product: None,
                    serial: None,
                },
                stale: VecDeque::new(),
                replies: replies.into(),
                pending: None,
                sent: Arc::clone(&sent),
                fail_io: false,
            };
            (fake, sent)
        }
    }

    impl RawHid for FakeHid {
        fn write_frame(&mut self, frame: &[u8; REPORT_SIZE]) -> Result<(), TransportError> {
            if self.fail_io {
                return Err(TransportError::HidError("No such device".into()));
            }
            self.sent.lock().unwrap().push(*frame);
            self.pending = self.replies.pop_front().flatten();
            Ok(())
        }

        fn read_frame(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            if let Some(frame) = self.stale.pop_front() {
                return Ok(Some(frame));
            }
            Ok(self.pending.take())
        }

        fn info(&self) -> &HidInterfaceInfo {
            &self.info
        }
    }

    fn reply(bytes: &[u8]) -> Option<Vec<u8>> {
        let mut frame = vec![0u8; REPORT_SIZE];
        frame[..bytes.len()].copy_from_slice(bytes);
        Some(frame)
    }

    type Sent = Arc<Mutex<Vec<[u8; REPORT_SIZE]>>>;

    fn keyboard(replies: Vec<Option<Vec<u8>>>) -> (ViaKeyboard, Sent) {
        let (fake, sent) = FakeHid::new(replies);
        let kb = ViaKeyboard::new(Box::new(fake)).with_timeout(Duration::from_millis(20));
        (kb, sent)
    }

    #[test]
    fn test_layer_state_queries_both_values() {
        let (mut kb, sent) = keyboard(vec![
            reply(&[0x08, 0x00, 0x01, 2]),
            reply(&[0x08, 0x00, 0x02, 0]),
        ]);
        let state = kb.get_layer_state().unwrap();
        assert_eq!(state, LayerState::new(2, 0));

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0][..3], &[0x08, 0x00, 0x01]);
        assert_eq!(&sent[1][..3], &[0x08, 0x00, 0x02]);
    }

    #[test]
    fn test_custom_channel_is_sent_and_checked() {
        let (fake, sent) = FakeHid::new(vec![
            reply(&[0x08, 0x05, 0x01, 3]),
            reply(&[0x08, 0x00, 0x01, 3]),
        ]);
        let mut kb = ViaKeyboard::new(Box::new(fake)).with_layer_channel(0x05);
        assert_eq!(kb.get_active_layer().unwrap(), 3);
        assert_eq!(sent.lock().unwrap()[0][1], 0x05);
        assert!(matches!(
            kb.get_active_layer(),
            Err(KeyboardError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_timeout_is_unresponsive() {
        let (mut kb, _) = keyboard(vec![None]);
        let err = kb.get_active_layer().unwrap_err();
        assert!(matches!(err, KeyboardError::DeviceUnresponsive(_)));
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_io_error_is_unresponsive() {
        let (mut fake, _) = FakeHid::new(vec![]);
        fake.fail_io = true;
        let mut kb = ViaKeyboard::new(Box::new(fake));
        assert!(matches!(
            kb.get_default_layer(),
            Err(KeyboardError::DeviceUnresponsive(_))
        ));
    }

    #[test]
    fn test_wrong_echo_is_protocol_mismatch() {
        let (mut kb, _) = keyboard(vec![reply(&[0x11, 4])]);
        assert!(matches!(
            kb.get_active_layer(),
            Err(KeyboardError::Protocol(ProtocolError::ProtocolMismatch {
                expected: 0x08,
                actual: 0x11
            }))
        ));
    }

    #[test]
    fn test_unhandled_command() {
        let (mut kb, _) = keyboard(vec![reply(&[0xFF, 0x08])]);
        assert!(matches!(
            kb.get_active_layer(),
            Err(KeyboardError::Protocol(ProtocolError::Unhandled(0x08)))
        ));
    }

    #[test]
    fn test_stale_reports_are_drained_first() {
        let (mut fake, _) = FakeHid::new(vec![reply(&[0x08, 0x00, 0x01, 1])]);
        fake.stale.push_back(vec![0x02; REPORT_SIZE]);
        fake.stale.push_back(vec![0x11; REPORT_SIZE]);
        let mut kb = ViaKeyboard::new(Box::new(fake));
        assert_eq!(kb.get_active_layer().unwrap(), 1);
    }

    #[test]
    fn test_query_info_tolerates_unhandled_queries() {
        let (mut kb, _) = keyboard(vec![
            reply(&[0x01, 0x00, 0x0C]),
            reply(&[0x02, 0x01, 0x00, 0x01, 0xE2, 0x40]),
            reply(&[0xFF, 0x02]),
            reply(&[0x02, 0x02, 0, 0, 0, 0]),
            reply(&[0x11, 4]),
            reply(&[0x0C, 16]),
            reply(&[0x0D, 0x03, 0xB0]),
        ]);
        let info = kb.query_info().unwrap();
        assert_eq!(info.protocol_version, Some(12));
        assert_eq!(info.uptime_ms, Some(123_456));
        assert_eq!(info.firmware_version, None);
        assert_eq!(info.layout_options, Some(0));
        assert_eq!(info.layer_count, Some(4));
        assert_eq!(info.macro_count, Some(16));
        assert_eq!(info.macro_buffer_size, Some(944));
    }

    #[test]
    fn test_query_info_aborts_when_device_is_gone() {
        let (mut kb, _) = keyboard(vec![reply(&[0x01, 0x00, 0x0C]), None]);
        assert!(kb.query_info().unwrap_err().is_disconnect());
    }

    #[test]
    fn test_switch_matrix_reads_every_row_block() {
        let geometry = MatrixGeometry::new(30, 8);
        let (mut kb, sent) = keyboard(vec![
            reply(&[0x02, 0x03, 0, 0b0000_0001]),
            reply(&[0x02, 0x03, 28, 0, 0b1000_0000]),
        ]);
        let matrix = kb.get_switch_matrix(geometry).unwrap();
        assert!(matrix.is_pressed(0, 0));
        assert!(matrix.is_pressed(29, 7));
        assert!(!matrix.is_pressed(28, 7));

        let sent = sent.lock().unwrap();
        assert_eq!(&sent[0][..3], &[0x02, 0x03, 0]);
        assert_eq!(&sent[1][..3], &[0x02, 0x03, 28]);
    }

    #[test]
    fn test_switch_matrix_checks_offset_echo() {
        let (mut kb, _) = keyboard(vec![reply(&[0x02, 0x03, 5])]);
        assert!(matches!(
            kb.get_switch_matrix(MatrixGeometry::new(4, 6)),
            Err(KeyboardError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_keymap_is_read_in_chunks() {
        let geometry = MatrixGeometry::new(2, 8);
        let mut codes = vec![0x0004u16; 32];
        codes[16 + 3] = 0x5222;
        let buffer: Vec<u8> = codes.iter().flat_map(|c| c.to_be_bytes()).collect();

        let mut replies = vec![reply(&[0x11, 2])];
        for (i, chunk) in buffer.chunks(28).enumerate() {
            let [hi, lo] = ((i * 28) as u16).to_be_bytes();
            let mut bytes = vec![0x12, hi, lo, chunk.len() as u8];
            bytes.extend_from_slice(chunk);
            replies.push(reply(&bytes));
        }
        let (mut kb, sent) = keyboard(replies);

        let keymap = kb.get_keymap(geometry).unwrap();
        assert_eq!(keymap.layer_count(), 2);
        assert_eq!(keymap.keycode(0, 0), 0x0004);
        assert_eq!(keymap.keycode(1, 3), 0x5222);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(&sent[3][..4], &[0x12, 0, 56, 8]);
    }

    #[test]
    fn test_unhandled_layer_query_is_reported() {
        let (mut kb, _) = keyboard(vec![reply(&[0xFF, 0x08])]);
        assert!(kb.get_layer_state().unwrap_err().is_unhandled());
    }
}
