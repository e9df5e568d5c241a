//! Layered external data
//!
//! A [`Hierarchy`] is an ordered list of named layers (most specific first,
//! e.g. `nodes/db1.example.com` then `common`). Lookups return the value
//! from the first layer that defines the key.

use crate::params::DefaultSource;
use crate::value::Value;
use std::collections::BTreeMap;

/// One named table of `"component::param"` values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    pub name: String,
    pub values: BTreeMap<String, Value>,
}

impl Layer {
    pub fn new(name: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Ordered layers, searched first-match-wins
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    layers: Vec<Layer>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer below the existing ones
    pub fn push(&mut self, layer: Layer) {
        log::debug!("Data layer '{}' ({} keys)", layer.name, layer.values.len());
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Name of the layer that answers `key`
    pub fn source_of(&self, key: &str) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.values.contains_key(key))
            .map(|l| l.name.as_str())
    }
}

impl DefaultSource for Hierarchy {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.layers.iter().find_map(|l| l.values.get(key).cloned())
    }
}
