// In: src/block.rs

//! The `Block` is the minimal processable unit of the system: one revision of one
//! article, read, transformed and written as a whole.
//!
//! A block carries its grouping key as a dedicated field rather than as a metadata
//! entry. Profiles only ever see `content` and `metadata`, so they cannot move a block
//! into a different group behind the pipeline's back.

use std::collections::BTreeMap;

use serde::{ser, Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Block payload: structured key-value data decoded from the source format.
pub type Content = Value;

/// Scalar metadata values. Serialized untagged, so a metadata map is plain JSON.
///
/// JSON has no NaN or infinity, so a non-finite `Float` refuses to serialize
/// instead of silently becoming an unreadable `null`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(#[serde(serialize_with = "serialize_finite")] f64),
    Text(String),
    List(Vec<String>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// False only for NaN and infinite floats, which cannot be stored.
    pub fn is_storable(&self) -> bool {
        match self {
            MetaValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(ser::Error::custom(format!(
            "non-finite float {} cannot be stored as metadata",
            value
        )));
    }
    serializer.serialize_f64(*value)
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

/// Saturates at `i64::MAX`.
impl From<u64> for MetaValue {
    fn from(i: u64) -> Self {
        MetaValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(v: Vec<String>) -> Self {
        MetaValue::List(v)
    }
}

/// String-keyed metadata. A `BTreeMap` keeps serialization deterministic.
pub type Metadata = BTreeMap<String, MetaValue>;

/// One revision (or any other atomic record) plus its bookkeeping.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    /// Grouping key (article id). All blocks with the same key share one warehouse.
    pub group: String,
    pub content: Content,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Block {
    pub fn new(group: impl Into<String>, content: Content, metadata: Metadata) -> Self {
        Self {
            group: group.into(),
            content,
            metadata,
        }
    }

    /// Builder-style helper for attaching a single metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.get(key)
    }

    /// Serialized record size; what warehouse size thresholds count.
    pub fn to_record_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_serializes_as_plain_json() {
        let block = Block::new("42", json!({"text": "hi"}), Metadata::new())
            .with_meta("title", "Answer")
            .with_meta("seq", 3i64)
            .with_meta("minor", true)
            .with_meta("categories", vec!["A".to_string()]);

        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["group"], "42");
        assert_eq!(value["metadata"]["title"], "Answer");
        assert_eq!(value["metadata"]["seq"], 3);
        assert_eq!(value["metadata"]["minor"], true);
        assert_eq!(value["metadata"]["categories"][0], "A");
    }

    #[test]
    fn test_record_bytes_preserve_block_exactly() {
        let block = Block::new("7", json!({"a": [1, 2, {"b": null}]}), Metadata::new())
            .with_meta("ratio", 0.5f64)
            .with_meta("revision_id", 99u64);
        let bytes = block.to_record_bytes().unwrap();
        let back = Block::from_record_bytes(&bytes).unwrap();
        assert_eq!(block, back);
        assert_eq!(back.meta("revision_id").and_then(MetaValue::as_i64), Some(99));
    }

    #[test]
    fn test_non_finite_floats_are_refused() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let block = Block::new("1", json!({}), Metadata::new()).with_meta("score", bad);
            assert!(!block.meta("score").unwrap().is_storable());
            let err = block.to_record_bytes().unwrap_err();
            assert!(err.to_string().contains("non-finite"));
        }
        assert!(MetaValue::from(1.5f64).is_storable());
    }

    #[test]
    fn test_large_unsigned_values_saturate() {
        assert_eq!(MetaValue::from(u64::MAX), MetaValue::Int(i64::MAX));
        assert_eq!(MetaValue::from(7u64), MetaValue::Int(7));
    }
}
