//! Plan output values.

use serde::{Serialize, Serializer};

/// Result contributed by one plan instance.
///
/// Serializes as `null`, the wrapped JSON value, or an array.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Output {
    /// No contribution.
    #[default]
    Nil,
    /// A single JSON value.
    Value(serde_json::Value),
    /// Ordered list of outputs.
    List(Vec<Output>),
}

impl Output {
    /// Wrap any serializable value. Falls back to [`Output::Nil`] if it does not encode.
    pub fn value<T: Serialize>(value: &T) -> Self {
        serde_json::to_value(value).map_or(Self::Nil, Self::Value)
    }

    /// Build a flat list, dropping `Nil`s and splicing nested lists.
    pub fn list<I: IntoIterator<Item = Output>>(items: I) -> Self {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Self::Nil => {}
                Self::List(inner) => flat.extend(inner),
                value @ Self::Value(_) => flat.push(value),
            }
        }
        if flat.is_empty() {
            Self::Nil
        } else {
            Self::List(flat)
        }
    }

    /// Whether this output contributes nothing.
    pub fn is_nil(&self) -> bool {
        match self {
            Self::Nil => true,
            Self::Value(_) => false,
            Self::List(items) => items.iter().all(Output::is_nil),
        }
    }

    /// Render to a JSON string.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<serde_json::Value> for Output {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl Serialize for Output {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Value(value) => value.serialize(serializer),
            Self::List(items) => serializer.collect_seq(items),
        }
    }
}
