//! Bridge wire format
//!
//! Each message is `[len: u32 BE][payload]` where the payload is UTF-8 JSON
//! `{"layer_name": "...", "layer_color": "#RRGGBB"}`.

use super::BridgeError;
use crate::layer::{is_hex_color, LayerChanged};

/// Length prefix size
pub const HEADER_SIZE: usize = 4;

/// Largest accepted payload
pub const MAX_PAYLOAD: usize = 4096;

/// Serialize one event into a length-prefixed frame
pub fn encode(event: &LayerChanged) -> Result<Vec<u8>, BridgeError> {
    let payload = serde_json::to_vec(event)
        .map_err(|e| BridgeError::MalformedMessage(format!("encode: {e}")))?;
    if payload.len() > MAX_PAYLOAD {
        return Err(BridgeError::MalformedMessage(format!(
            "payload of {} bytes exceeds {MAX_PAYLOAD}",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parse and validate one payload
pub fn decode_payload(payload: &[u8]) -> Result<LayerChanged, BridgeError> {
    let event: LayerChanged = serde_json::from_slice(payload)
        .map_err(|e| BridgeError::MalformedMessage(format!("invalid JSON: {e}")))?;
    if !is_hex_color(&event.layer_color) {
        return Err(BridgeError::MalformedMessage(format!(
            "invalid color '{}'",
            event.layer_color
        )));
    }
    Ok(event)
}

/// Reassembles messages from arbitrarily split reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held that do not yet form a complete message
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete message, if any
    ///
    /// An oversized length is rejected as soon as the header arrives.
    pub fn next_message(&mut self) -> Result<Option<LayerChanged>, BridgeError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(BridgeError::MalformedMessage(format!(
                "declared length {len} exceeds {MAX_PAYLOAD}"
            )));
        }
        if self.buf.len() < HEADER_SIZE + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..HEADER_SIZE + len).collect();
        decode_payload(&frame[HEADER_SIZE..]).map(Some)
    }
}
