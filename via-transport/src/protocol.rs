//! VIA raw HID protocol constants and frame codec
//!
//! Every exchange is one 32-byte report in each direction:
//! `[cmd] [args...] [zero padding]`. The firmware echoes the command byte in
//! its response, or answers `0xFF` for commands it does not handle.
//! Multi-byte values are big-endian.

use crate::error::ProtocolError;

/// Raw HID report size (RAW_EPSIZE)
pub const REPORT_SIZE: usize = 32;

/// Bytes available after the command byte
pub const PAYLOAD_SIZE: usize = REPORT_SIZE - 1;

/// Usage page of the QMK raw HID interface
pub const VIA_USAGE_PAGE: u16 = 0xFF60;

/// Usage of the QMK raw HID interface
pub const VIA_USAGE: u16 = 0x61;

/// VIA command identifiers (id_*)
pub mod cmd {
    pub const GET_PROTOCOL_VERSION: u8 = 0x01;
    pub const GET_KEYBOARD_VALUE: u8 = 0x02;
    pub const CUSTOM_GET_VALUE: u8 = 0x08;
    pub const GET_MACRO_COUNT: u8 = 0x0C;
    pub const GET_MACRO_BUFFER_SIZE: u8 = 0x0D;
    pub const GET_LAYER_COUNT: u8 = 0x11;
    pub const GET_KEYMAP_BUFFER: u8 = 0x12;
    /// Firmware reply for unknown commands
    pub const UNHANDLED: u8 = 0xFF;

    /// Get human-readable name for command byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            GET_PROTOCOL_VERSION => "GET_PROTOCOL_VERSION",
            GET_KEYBOARD_VALUE => "GET_KEYBOARD_VALUE",
            CUSTOM_GET_VALUE => "CUSTOM_GET_VALUE",
            GET_MACRO_COUNT => "GET_MACRO_COUNT",
            GET_MACRO_BUFFER_SIZE => "GET_MACRO_BUFFER_SIZE",
            GET_LAYER_COUNT => "GET_LAYER_COUNT",
            GET_KEYMAP_BUFFER => "GET_KEYMAP_BUFFER",
            UNHANDLED => "UNHANDLED",
            _ => "UNKNOWN",
        }
    }
}

/// Sub-ids for GET_KEYBOARD_VALUE
pub mod keyboard_value {
    pub const UPTIME: u8 = 0x01;
    pub const LAYOUT_OPTIONS: u8 = 0x02;
    pub const SWITCH_MATRIX_STATE: u8 = 0x03;
    pub const FIRMWARE_VERSION: u8 = 0x04;
}

/// Layer state values served through CUSTOM_GET_VALUE.
///
/// The keymap answers `[0x08, channel, value_id, layer]`.
pub mod layer_value {
    /// Default custom channel the keymap listens on
    pub const DEFAULT_CHANNEL: u8 = 0x00;
    /// Highest active layer in `layer_state`
    pub const ACTIVE_LAYER: u8 = 0x01;
    /// Highest layer in `default_layer_state`
    pub const DEFAULT_LAYER: u8 = 0x02;
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaResponse {
    /// Echoed command byte
    pub command: u8,
    /// Bytes after the command byte
    pub payload: [u8; PAYLOAD_SIZE],
}

impl ViaResponse {
    /// Check the echo against the command that was sent
    pub fn expect_command(&self, expected: u8) -> Result<&[u8; PAYLOAD_SIZE], ProtocolError> {
        if self.command == expected {
            Ok(&self.payload)
        } else {
            Err(ProtocolError::ProtocolMismatch {
                expected,
                actual: self.command,
            })
        }
    }

    /// Big-endian u16 at payload offset
    pub fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.payload[offset], self.payload[offset + 1]])
    }

    /// Big-endian u32 at payload offset
    pub fn u32_at(&self, offset: usize) -> u32 {
        u32::from_be_bytes([
            self.payload[offset],
            self.payload[offset + 1],
            self.payload[offset + 2],
            self.payload[offset + 3],
        ])
    }
}

/// Build a request frame
///
/// Format: `[cmd] [args...] [zero padding to 32 bytes]`
pub fn encode_request(command: u8, args: &[u8]) -> Result<[u8; REPORT_SIZE], ProtocolError> {
    if args.len() > PAYLOAD_SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} argument bytes exceed the {PAYLOAD_SIZE}-byte payload",
            args.len()
        )));
    }
    let mut frame = [0u8; REPORT_SIZE];
    frame[0] = command;
    frame[1..1 + args.len()].copy_from_slice(args);
    Ok(frame)
}

/// Decode a response frame
///
/// Fails with `MalformedFrame` for anything that is not a 32-byte report with
/// a non-zero command byte, and with `Unhandled` for the firmware's 0xFF reply.
pub fn decode_response(frame: &[u8]) -> Result<ViaResponse, ProtocolError> {
    if frame.len() != REPORT_SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "expected {REPORT_SIZE} bytes, got {}",
            frame.len()
        )));
    }
    match frame[0] {
        0x00 => Err(ProtocolError::MalformedFrame("empty command byte".into())),
        cmd::UNHANDLED => Err(ProtocolError::Unhandled(frame[1])),
        command => {
            let mut payload = [0u8; PAYLOAD_SIZE];
            payload.copy_from_slice(&frame[1..]);
            Ok(ViaResponse { command, payload })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_with_zeros() {
        let frame =
            encode_request(cmd::CUSTOM_GET_VALUE, &[0x00, layer_value::ACTIVE_LAYER]).unwrap();
        assert_eq!(frame.len(), REPORT_SIZE);
        assert_eq!(&frame[..3], &[0x08, 0x00, 0x01]);
        assert!(frame[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_rejects_oversized_args() {
        let args = [0u8; PAYLOAD_SIZE + 1];
        assert!(matches!(
            encode_request(cmd::GET_LAYER_COUNT, &args),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(encode_request(cmd::GET_LAYER_COUNT, &args[..PAYLOAD_SIZE]).is_ok());
    }

    #[test]
    fn test_decode_then_encode_reproduces_frame() {
        let mut frame = [0u8; REPORT_SIZE];
        frame[0] = cmd::GET_KEYBOARD_VALUE;
        frame[1] = keyboard_value::UPTIME;
        frame[2..6].copy_from_slice(&123_456u32.to_be_bytes());
        frame[31] = 0xAB;

        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.command, cmd::GET_KEYBOARD_VALUE);
        assert_eq!(resp.u32_at(1), 123_456);
        assert_eq!(encode_request(resp.command, &resp.payload).unwrap(), frame);
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        for garbage in [&[][..], &[0x08; 5][..], &[0x01; 33][..], &[0u8; REPORT_SIZE][..]] {
            assert!(matches!(
                decode_response(garbage),
                Err(ProtocolError::MalformedFrame(_))
            ));
        }
    }

    #[test]
    fn test_decode_unhandled() {
        let mut frame = [0u8; REPORT_SIZE];
        frame[0] = cmd::UNHANDLED;
        frame[1] = 0x08;
        assert_eq!(decode_response(&frame), Err(ProtocolError::Unhandled(0x08)));
    }

    #[test]
    fn test_expect_command_mismatch() {
        let mut frame = [0u8; REPORT_SIZE];
        frame[0] = cmd::GET_LAYER_COUNT;
        frame[1] = 4;
        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.expect_command(cmd::GET_LAYER_COUNT).unwrap()[0], 4);
        assert_eq!(
            resp.expect_command(cmd::CUSTOM_GET_VALUE),
            Err(ProtocolError::ProtocolMismatch {
                expected: 0x08,
                actual: 0x11
            })
        );
    }

    #[test]
    fn test_command_names() {
        assert_eq!(cmd::name(0x01), "GET_PROTOCOL_VERSION");
        assert_eq!(cmd::name(0x12), "GET_KEYMAP_BUFFER");
        assert_eq!(cmd::name(0x42), "UNKNOWN");
    }
}
