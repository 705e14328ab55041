//! Layer accumulation with key/value interning.

use std::collections::HashMap;

use super::proto::{Feature, GeomType, Layer, Value};
use super::{MVT_EXTENT, MVT_VERSION};

/// Hashable identity for a [`Value`], keyed on the populated field.
///
/// `Value` itself carries floats, so interning goes through a bit-pattern
/// key instead of deriving `Hash` on the message.
#[derive(Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Str(String),
    F32(u32),
    F64(u64),
    I64(i64),
    U64(u64),
    S64(i64),
    Bool(bool),
}

impl From<&Value> for ValueKey {
    fn from(value: &Value) -> Self {
        if let Some(s) = &value.string_value {
            ValueKey::Str(s.clone())
        } else if let Some(f) = value.float_value {
            ValueKey::F32(f.to_bits())
        } else if let Some(f) = value.double_value {
            ValueKey::F64(f.to_bits())
        } else if let Some(i) = value.int_value {
            ValueKey::I64(i)
        } else if let Some(u) = value.uint_value {
            ValueKey::U64(u)
        } else if let Some(s) = value.sint_value {
            ValueKey::S64(s)
        } else {
            ValueKey::Bool(value.bool_value.unwrap_or_default())
        }
    }
}

/// Accumulates one named layer, interning keys and values so features
/// reference them by index through their `tags`.
pub struct LayerBuilder {
    name: String,
    features: Vec<Feature>,
    keys: Vec<String>,
    values: Vec<Value>,
    key_index: HashMap<String, u32>,
    value_index: HashMap<ValueKey, u32>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            keys: Vec::new(),
            values: Vec::new(),
            key_index: HashMap::new(),
            value_index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn intern_key(&mut self, key: &str) -> u32 {
        if let Some(&index) = self.key_index.get(key) {
            return index;
        }

        let index = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), index);
        index
    }

    fn intern_value(&mut self, value: Value) -> u32 {
        let key = ValueKey::from(&value);
        if let Some(&index) = self.value_index.get(&key) {
            return index;
        }

        let index = self.values.len() as u32;
        self.values.push(value);
        self.value_index.insert(key, index);
        index
    }

    /// Appends a feature. `attributes` are already reduced to the wire
    /// format's scalar set; order is preserved in the tag stream.
    pub fn push(
        &mut self,
        id: Option<u64>,
        kind: GeomType,
        geometry: Vec<u32>,
        attributes: impl IntoIterator<Item = (String, Value)>,
    ) {
        let mut tags = Vec::new();
        for (key, value) in attributes {
            tags.push(self.intern_key(&key));
            tags.push(self.intern_value(value));
        }

        self.features.push(Feature {
            id,
            tags,
            r#type: Some(i32::from(kind)),
            geometry,
        });
    }

    /// Finishes the layer. Empty layers are valid output.
    pub fn build(self) -> Layer {
        Layer {
            version: MVT_VERSION,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: Some(MVT_EXTENT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt;

    #[test]
    fn interns_repeated_keys_and_values() {
        let mut builder = LayerBuilder::new("roads");

        builder.push(
            Some(1),
            GeomType::Point,
            vec![9, 0, 0],
            [
                ("class".to_string(), mvt::Value::from_string("primary")),
                ("lanes".to_string(), mvt::Value::from_int(2)),
            ],
        );
        builder.push(
            Some(2),
            GeomType::Point,
            vec![9, 2, 2],
            [
                ("class".to_string(), mvt::Value::from_string("primary")),
                ("lanes".to_string(), mvt::Value::from_int(4)),
            ],
        );

        let layer = builder.build();
        assert_eq!(layer.keys, vec!["class", "lanes"]);
        assert_eq!(layer.values.len(), 3);
        assert_eq!(layer.features[0].tags, vec![0, 0, 1, 1]);
        assert_eq!(layer.features[1].tags, vec![0, 0, 1, 2]);
    }

    #[test]
    fn distinguishes_value_types_with_equal_payloads() {
        let mut builder = LayerBuilder::new("t");

        builder.push(
            None,
            GeomType::Point,
            vec![9, 0, 0],
            [
                ("a".to_string(), mvt::Value::from_int(1)),
                ("b".to_string(), mvt::Value::from_uint(1)),
            ],
        );

        let layer = builder.build();
        assert_eq!(layer.values.len(), 2);
    }

    #[test]
    fn empty_layer_builds() {
        let layer = LayerBuilder::new("empty").build();
        assert_eq!(layer.version, MVT_VERSION);
        assert_eq!(layer.extent, Some(MVT_EXTENT));
        assert!(layer.features.is_empty());
    }
}
