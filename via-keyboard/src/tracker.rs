//! Layer inference from key presses
//!
//! Replays switch matrix changes against the keymap and follows the layer
//! keys the firmware would act on: `MO(n)` while held, `DF(n)` and `TG(n)`
//! on press. A key resolves on the layer that was current when it went down,
//! so releasing `MO(n)` on layer `n` still releases `MO(n)`.

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::info::LayerState;
use crate::matrix::{Keymap, SwitchMatrix};

/// QMK layer keycode ranges
pub mod keycode {
    pub const MO_MIN: u16 = 0x5220;
    pub const MO_MAX: u16 = 0x523F;
    pub const DF_MIN: u16 = 0x5240;
    pub const DF_MAX: u16 = 0x525F;
    pub const TG_MIN: u16 = 0x5260;
    pub const TG_MAX: u16 = 0x527F;
    /// Target layer bits of a layer keycode
    pub const LAYER_MASK: u16 = 0x1F;
}

/// A keycode that switches layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKey {
    /// `MO(n)`: layer on while held
    Momentary(u8),
    /// `DF(n)`: set the default layer
    Default(u8),
    /// `TG(n)`: toggle the layer
    Toggle(u8),
}

impl LayerKey {
    pub fn from_keycode(code: u16) -> Option<Self> {
        let layer = (code & keycode::LAYER_MASK) as u8;
        match code {
            keycode::MO_MIN..=keycode::MO_MAX => Some(LayerKey::Momentary(layer)),
            keycode::DF_MIN..=keycode::DF_MAX => Some(LayerKey::Default(layer)),
            keycode::TG_MIN..=keycode::TG_MAX => Some(LayerKey::Toggle(layer)),
            _ => None,
        }
    }
}

/// Layer state reconstructed from switch matrix samples
pub struct LayerTracker {
    keymap: Keymap,
    previous: SwitchMatrix,
    /// Keycode each held key went down with
    held: HashMap<usize, u16>,
    momentary: BTreeSet<u8>,
    current: u8,
    default: u8,
}

impl LayerTracker {
    pub fn new(keymap: Keymap) -> Self {
        let previous = SwitchMatrix::released(keymap.geometry());
        Self {
            keymap,
            previous,
            held: HashMap::new(),
            momentary: BTreeSet::new(),
            current: 0,
            default: 0,
        }
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn state(&self) -> LayerState {
        LayerState::new(self.current, self.default)
    }

    /// Apply one matrix sample and return the resulting state
    pub fn update(&mut self, matrix: SwitchMatrix) -> LayerState {
        let changes: Vec<(usize, bool)> = matrix.changes_since(&self.previous).collect();
        for (index, pressed) in changes {
            let code = if pressed {
                let code = self.keymap.keycode(self.current, index);
                self.held.insert(index, code);
                code
            } else {
                self.held.remove(&index).unwrap_or(0)
            };
            if let Some(key) = LayerKey::from_keycode(code) {
                trace!("{:?} {}", key, if pressed { "down" } else { "up" });
                self.apply(key, pressed);
            }
        }
        self.previous = matrix;
        self.state()
    }

    fn apply(&mut self, key: LayerKey, pressed: bool) {
        match (key, pressed) {
            (LayerKey::Momentary(layer), true) => {
                self.momentary.insert(layer);
                self.current = self.top_layer();
            }
            (LayerKey::Momentary(layer), false) => {
                self.momentary.remove(&layer);
                self.current = self.top_layer();
            }
            (LayerKey::Default(layer), true) => {
                self.default = layer;
                if self.momentary.is_empty() {
                    self.current = layer;
                }
            }
            (LayerKey::Toggle(layer), true) => {
                self.current = if self.current == layer {
                    self.default
                } else {
                    layer
                };
            }
            (LayerKey::Default(_) | LayerKey::Toggle(_), false) => {}
        }
    }

    fn top_layer(&self) -> u8 {
        self.momentary.last().copied().unwrap_or(self.default)
    }
}
