//! Layer table and the LayerChanged event
//!
//! The table maps a keymap layer index to the name and color shown by the
//! indicator. Indices past the end of the table fall back to the first entry.

use serde::{Deserialize, Serialize};
use via_keyboard::LayerState;

use crate::config::ConfigError;

/// One row of the layer table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
}

impl LayerEntry {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Check for `#RRGGBB`
pub fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// The only datum that crosses from the poller to the indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerChanged {
    pub layer_name: String,
    pub layer_color: String,
}

impl LayerChanged {
    pub fn new(layer_name: impl Into<String>, layer_color: impl Into<String>) -> Self {
        Self {
            layer_name: layer_name.into(),
            layer_color: layer_color.into(),
        }
    }
}

impl From<&LayerEntry> for LayerChanged {
    fn from(entry: &LayerEntry) -> Self {
        Self::new(entry.name.clone(), entry.color.clone())
    }
}

impl std::fmt::Display for LayerChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.layer_name, self.layer_color)
    }
}

/// Index → (name, color), never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTable {
    entries: Vec<LayerEntry>,
}

impl Default for LayerTable {
    fn default() -> Self {
        Self {
            entries: default_entries(),
        }
    }
}

/// Base, Game, Lower, Raise, Adjust, Mouse, Extra
pub fn default_entries() -> Vec<LayerEntry> {
    vec![
        LayerEntry::new("Base", "#787878"),
        LayerEntry::new("Game", "#00FFFF"),
        LayerEntry::new("Lower", "#FF3232"),
        LayerEntry::new("Raise", "#0000FF"),
        LayerEntry::new("Adjust", "#50DC50"),
        LayerEntry::new("Mouse", "#FFA500"),
        LayerEntry::new("Extra", "#FF00FF"),
    ]
}

impl LayerTable {
    pub fn new(entries: Vec<LayerEntry>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::Invalid("layer table is empty".into()));
        }
        if let Some(bad) = entries.iter().find(|e| !is_hex_color(&e.color)) {
            return Err(ConfigError::Invalid(format!(
                "layer '{}' has color '{}', expected #RRGGBB",
                bad.name, bad.color
            )));
        }
        Ok(Self { entries })
    }

    /// Entry for a layer index; unmapped indices get the first entry
    pub fn entry(&self, index: u8) -> &LayerEntry {
        self.entries
            .get(usize::from(index))
            .unwrap_or(&self.entries[0])
    }

    /// Event for an observed state, keyed by its effective layer
    pub fn event_for(&self, state: LayerState) -> LayerChanged {
        self.entry(state.effective_layer()).into()
    }

    pub fn entries(&self) -> &[LayerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
