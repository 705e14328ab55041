//! Feature property reduction to the wire format's scalar set.

use std::collections::HashMap;

use log::debug;

use crate::config::PropertyTransformation;
use crate::datasource::{FieldSelection, TypedValue};
use crate::mvt;

/// Outcome of one transformation link.
pub enum Transformed {
    Keep(TypedValue),
    /// Erase the value; the rest of the chain is skipped.
    Omit,
}

/// One link in a property's transformation chain.
pub trait PropertyTransformer: Send + Sync {
    fn apply(&self, name: &str, value: TypedValue) -> Transformed;
}

impl<F> PropertyTransformer for F
where
    F: Fn(&str, TypedValue) -> Transformed + Send + Sync,
{
    fn apply(&self, name: &str, value: TypedValue) -> Transformed {
        self(name, value)
    }
}

impl PropertyTransformer for PropertyTransformation {
    fn apply(&self, _: &str, value: TypedValue) -> Transformed {
        match self {
            PropertyTransformation::Remove => Transformed::Omit,
            PropertyTransformation::StringFormat { format } => {
                let text = match &value {
                    TypedValue::Bool(b) => b.to_string(),
                    TypedValue::Integer(i) => i.to_string(),
                    TypedValue::Float(f) => f.to_string(),
                    TypedValue::String(s) => s.clone(),
                    TypedValue::DateTime(dt) => dt.to_rfc3339(),
                    // Nothing sensible to render for nested values.
                    _ => return Transformed::Keep(value),
                };

                Transformed::Keep(TypedValue::String(format.replace("{{value}}", &text)))
            }
        }
    }
}

/// Maps typed feature properties to [`mvt::Value`]s, applying the
/// configured transformation chains and the requested field list.
pub struct AttributeEncoder {
    fields: FieldSelection,
    transformers: Vec<(String, Box<dyn PropertyTransformer>)>,
}

impl AttributeEncoder {
    pub fn new(fields: FieldSelection) -> Self {
        Self {
            fields,
            transformers: Vec::new(),
        }
    }

    /// Appends a transformation for `property`. Chains run in registration
    /// order.
    pub fn with_transformer(
        mut self,
        property: impl Into<String>,
        transformer: impl PropertyTransformer + 'static,
    ) -> Self {
        self.transformers.push((property.into(), Box::new(transformer)));
        self
    }

    /// Appends the configured declarative chains.
    pub fn with_transformations(
        mut self,
        transformations: &HashMap<String, Vec<PropertyTransformation>>,
    ) -> Self {
        for (property, chain) in transformations {
            for transformation in chain {
                self = self.with_transformer(property.clone(), transformation.clone());
            }
        }
        self
    }

    /// Encodes one property. `None` drops it from the feature: not
    /// selected, erased by a transformation, or not reducible to the
    /// scalar set.
    pub fn encode(&self, name: &str, value: &TypedValue) -> Option<mvt::Value> {
        if !self.fields.covers(name) {
            return None;
        }

        let mut current = value.clone();
        for (property, transformer) in &self.transformers {
            if property != name {
                continue;
            }
            match transformer.apply(name, current) {
                Transformed::Keep(value) => current = value,
                Transformed::Omit => return None,
            }
        }

        scalar(name, current)
    }

    /// Encodes a record's properties in order, dropping what cannot be
    /// carried.
    pub fn encode_all<'a>(
        &'a self,
        properties: impl IntoIterator<Item = (&'a String, &'a TypedValue)> + 'a,
    ) -> impl Iterator<Item = (String, mvt::Value)> + 'a {
        properties
            .into_iter()
            .filter_map(|(name, value)| self.encode(name, value).map(|v| (name.clone(), v)))
    }
}

/// Reduction to the wire scalar set. Nested values the caller did not
/// flatten cannot be represented and are excluded.
fn scalar(name: &str, value: TypedValue) -> Option<mvt::Value> {
    match value {
        TypedValue::Bool(b) => Some(mvt::Value::from_bool(b)),
        TypedValue::Integer(i) => Some(mvt::Value::from_int(i)),
        TypedValue::Float(f) => Some(mvt::Value::from_double(f)),
        TypedValue::String(s) => Some(mvt::Value::from_string(s)),
        TypedValue::DateTime(dt) => Some(mvt::Value::from_string(dt.to_rfc3339())),
        TypedValue::Object | TypedValue::Array => {
            debug!("property '{}' holds an unflattened {:?}, excluded", name, value);
            None
        }
        TypedValue::Geometry => None,
    }
}
