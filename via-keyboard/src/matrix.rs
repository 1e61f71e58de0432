//! Switch matrix and keymap buffer
//!
//! Used when the keymap does not answer the layer query: the layer is then
//! inferred from key presses (see [`crate::tracker`]).
//!
//! Wire formats:
//! - `GET_KEYBOARD_VALUE [0x03, row_offset]` answers
//!   `[0x02, 0x03, row_offset, rows...]`, each row big-endian in
//!   `ceil(cols / 8)` bytes, bit `c` set while column `c` is pressed.
//! - `GET_KEYMAP_BUFFER [offset_hi, offset_lo, size]` answers
//!   `[0x12, offset_hi, offset_lo, size, bytes...]`; the buffer is every
//!   layer's keycodes, row-major, big-endian u16.

use std::fmt;

/// Matrix bytes that fit in one switch matrix reply
pub const MATRIX_BYTES_PER_QUERY: usize = 28;

/// Largest chunk read from the keymap buffer per request
pub const KEYMAP_CHUNK: usize = 28;

/// Rows and columns of the keyboard's switch matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixGeometry {
    pub rows: u8,
    pub cols: u8,
}

impl MatrixGeometry {
    pub fn new(rows: u8, cols: u8) -> Self {
        Self { rows, cols }
    }

    pub fn bytes_per_row(&self) -> usize {
        usize::from(self.cols).div_ceil(8)
    }

    /// Rows returned by one switch matrix request
    pub fn rows_per_query(&self) -> usize {
        (MATRIX_BYTES_PER_QUERY / self.bytes_per_row().max(1)).max(1)
    }

    /// Keys per layer
    pub fn key_count(&self) -> usize {
        usize::from(self.rows) * usize::from(self.cols)
    }

    /// Row-major key index
    pub fn index(&self, row: u8, col: u8) -> usize {
        usize::from(row) * usize::from(self.cols) + usize::from(col)
    }
}

impl fmt::Display for MatrixGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Pressed state of every switch, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchMatrix {
    geometry: MatrixGeometry,
    pressed: Vec<bool>,
}

impl SwitchMatrix {
    /// All switches released
    pub fn released(geometry: MatrixGeometry) -> Self {
        Self {
            geometry,
            pressed: vec![false; geometry.key_count()],
        }
    }

    pub fn geometry(&self) -> MatrixGeometry {
        self.geometry
    }

    /// Fill rows starting at `first_row` from packed row bytes
    ///
    /// Rows past the end of the matrix or of `data` are left untouched.
    pub fn fill_rows(&mut self, first_row: usize, data: &[u8]) {
        let geometry = self.geometry;
        let width = geometry.bytes_per_row();
        let rows = usize::from(geometry.rows);
        for (i, chunk) in data.chunks_exact(width).enumerate() {
            let row = first_row + i;
            if row >= rows {
                break;
            }
            let bits = chunk.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            for col in 0..usize::from(geometry.cols) {
                let bit = u32::try_from(col)
                    .ok()
                    .and_then(|c| bits.checked_shr(c))
                    .unwrap_or(0);
                self.pressed[row * usize::from(geometry.cols) + col] = bit & 1 == 1;
            }
        }
    }

    pub fn is_pressed(&self, row: u8, col: u8) -> bool {
        if row >= self.geometry.rows || col >= self.geometry.cols {
            return false;
        }
        self.pressed[self.geometry.index(row, col)]
    }

    /// Key indices whose state differs from `previous`
    pub fn changes_since<'a>(
        &'a self,
        previous: &'a SwitchMatrix,
    ) -> impl Iterator<Item = (usize, bool)> + 'a {
        self.pressed
            .iter()
            .zip(previous.pressed.iter())
            .enumerate()
            .filter(|(_, (now, before))| now != before)
            .map(|(index, (now, _))| (index, *now))
    }
}

/// Keycodes of every layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    geometry: MatrixGeometry,
    layers: Vec<Vec<u16>>,
}

impl Keymap {
    /// Parse the raw keymap buffer
    ///
    /// A short buffer leaves the missing keys as `KC_NO` (0).
    pub fn from_buffer(geometry: MatrixGeometry, layer_count: u8, buffer: &[u8]) -> Self {
        let keys = geometry.key_count();
        let mut codes = buffer
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        let layers = (0..layer_count)
            .map(|_| (0..keys).map(|_| codes.next().unwrap_or(0)).collect())
            .collect();
        Self { geometry, layers }
    }

    pub fn geometry(&self) -> MatrixGeometry {
        self.geometry
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Keycode at a key index, `KC_NO` outside the keymap
    pub fn keycode(&self, layer: u8, index: usize) -> u16 {
        self.layers
            .get(usize::from(layer))
            .and_then(|keys| keys.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Buffer size in bytes for `layer_count` layers
    pub fn buffer_len(geometry: MatrixGeometry, layer_count: u8) -> usize {
        geometry.key_count() * usize::from(layer_count) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        let sofle = MatrixGeometry::new(10, 6);
        assert_eq!(sofle.bytes_per_row(), 1);
        assert_eq!(sofle.rows_per_query(), 28);
        assert_eq!(sofle.key_count(), 60);
        assert_eq!(sofle.index(5, 2), 32);

        let wide = MatrixGeometry::new(6, 17);
        assert_eq!(wide.bytes_per_row(), 3);
        assert_eq!(wide.rows_per_query(), 9);
    }

    #[test]
    fn test_fill_rows_is_big_endian_per_row() {
        let mut matrix = SwitchMatrix::released(MatrixGeometry::new(2, 12));
        // Row 0: columns 0 and 9; row 1: column 11
        matrix.fill_rows(0, &[0x02, 0x01, 0x08, 0x00]);
        assert!(matrix.is_pressed(0, 0));
        assert!(matrix.is_pressed(0, 9));
        assert!(!matrix.is_pressed(0, 1));
        assert!(matrix.is_pressed(1, 11));
        assert!(!matrix.is_pressed(1, 3));
        assert!(!matrix.is_pressed(9, 0));
    }

    #[test]
    fn test_fill_rows_at_offset_ignores_overflow() {
        let mut matrix = SwitchMatrix::released(MatrixGeometry::new(3, 4));
        matrix.fill_rows(2, &[0b0100, 0xFF, 0xFF]);
        assert!(matrix.is_pressed(2, 2));
        assert!(!matrix.is_pressed(0, 2));
    }

    #[test]
    fn test_changes_since() {
        let geometry = MatrixGeometry::new(1, 4);
        let before = SwitchMatrix::released(geometry);
        let mut now = SwitchMatrix::released(geometry);
        now.fill_rows(0, &[0b1001]);
        let changes: Vec<_> = now.changes_since(&before).collect();
        assert_eq!(changes, vec![(0, true), (3, true)]);
        assert_eq!(before.changes_since(&now).count(), 2);
    }

    #[test]
    fn test_keymap_from_buffer() {
        let geometry = MatrixGeometry::new(1, 2);
        let buffer = [0x00, 0x04, 0x52, 0x21, 0x00, 0x05];
        let keymap = Keymap::from_buffer(geometry, 2, &buffer);
        assert_eq!(keymap.layer_count(), 2);
        assert_eq!(keymap.keycode(0, 0), 0x0004);
        assert_eq!(keymap.keycode(0, 1), 0x5221);
        assert_eq!(keymap.keycode(1, 0), 0x0005);
        assert_eq!(keymap.keycode(1, 1), 0);
        assert_eq!(keymap.keycode(7, 0), 0);
        assert_eq!(Keymap::buffer_len(geometry, 2), 8);
    }
}
