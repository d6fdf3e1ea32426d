//! Normalized record model.
//!
//! A [`Record`] is one flattened GraphQL object: a cache key plus a map of
//! field name to [`FieldValue`]. Links to other objects are stored as
//! [`CacheReference`]s so the object graph can be walked key by key.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::{CacheResult, SerializationError};

/// Field name to value mapping held by a record.
pub type Fields = BTreeMap<String, FieldValue>;

/// Pointer from a field to another record, by cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheReference(String);

impl CacheReference {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key of the referenced record.
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Value of a single record field.
///
/// References compare by key only; whatever the referenced record holds is
/// tracked by that record's own merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Reference(CacheReference),
    List(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Shorthand for a reference value.
    pub fn reference(key: impl Into<String>) -> Self {
        FieldValue::Reference(CacheReference::new(key))
    }

    pub fn as_reference(&self) -> Option<&CacheReference> {
        match self {
            FieldValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Push every reference reachable from this value, depth first.
    pub fn collect_references(&self, out: &mut Vec<CacheReference>) {
        match self {
            FieldValue::Reference(r) => out.push(r.clone()),
            FieldValue::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            FieldValue::Object(map) => {
                for value in map.values() {
                    value.collect_references(out);
                }
            }
            FieldValue::Null
            | FieldValue::Bool(_)
            | FieldValue::Int(_)
            | FieldValue::Float(_)
            | FieldValue::String(_) => {}
        }
    }

    /// False when a NaN or infinite float sits anywhere in this value.
    pub fn is_finite(&self) -> bool {
        match self {
            FieldValue::Float(f) => f.is_finite(),
            FieldValue::List(items) => items.iter().all(FieldValue::is_finite),
            FieldValue::Object(map) => map.values().all(FieldValue::is_finite),
            _ => true,
        }
    }

    /// Rough in-memory footprint, used by size-bounded tiers.
    pub fn size_estimate_bytes(&self) -> u64 {
        match self {
            FieldValue::Null | FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 8,
            FieldValue::String(s) => s.len() as u64,
            FieldValue::Reference(r) => r.key().len() as u64,
            FieldValue::List(items) => items.iter().map(FieldValue::size_estimate_bytes).sum(),
            FieldValue::Object(map) => map
                .iter()
                .map(|(k, v)| k.len() as u64 + v.size_estimate_bytes())
                .sum(),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<CacheReference> for FieldValue {
    fn from(v: CacheReference) -> Self {
        FieldValue::Reference(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::List(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// A normalized GraphQL object stored under a unique cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    key: String,
    fields: Fields,
    /// Write that last touched this record. Not persisted by durable tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mutation_id: Option<Uuid>,
}

impl Record {
    /// Create an empty record.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Fields::new(),
            mutation_id: None,
        }
    }

    pub fn from_fields(key: impl Into<String>, fields: Fields) -> Self {
        Self {
            key: key.into(),
            fields,
            mutation_id: None,
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Tag the record with the mutation that produced it.
    pub fn with_mutation_id(mut self, mutation_id: Uuid) -> Self {
        self.mutation_id = Some(mutation_id);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn mutation_id(&self) -> Option<Uuid> {
        self.mutation_id
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Reject records holding NaN or infinite floats.
    ///
    /// Such values never compare equal to themselves and cannot be encoded,
    /// so every tier refuses them on merge.
    pub fn ensure_finite(&self) -> CacheResult<()> {
        match self.fields.iter().find(|(_, value)| !value.is_finite()) {
            Some((name, _)) => Err(SerializationError::Encode {
                key: self.key.clone(),
                reason: format!("field {} holds a non-finite float", name),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Merge `incoming` into this record, field by field.
    ///
    /// Fields absent from `incoming` are kept. Returns the names of fields
    /// whose value differs from what was stored (new fields included).
    /// Tiers call [`Record::ensure_finite`] first; a NaN field would be
    /// reported as changed on every merge.
    pub fn merge_from(&mut self, incoming: &Record) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, value) in &incoming.fields {
            if self.fields.get(name) != Some(value) {
                self.fields.insert(name.clone(), value.clone());
                changed.insert(name.clone());
            }
        }
        if incoming.mutation_id.is_some() {
            self.mutation_id = incoming.mutation_id;
        }
        changed
    }

    /// Every reference held by this record's fields, in field order.
    pub fn references(&self) -> Vec<CacheReference> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Approximate size of the record, key and field names included.
    pub fn size_estimate_bytes(&self) -> u64 {
        self.key.len() as u64
            + self
                .fields
                .iter()
                .map(|(name, value)| name.len() as u64 + value.size_estimate_bytes())
                .sum::<u64>()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> Record {
        Record::new("User:1")
            .with_field("name", name)
            .with_field("age", 30)
            .with_field("friend", FieldValue::reference("User:2"))
    }

    #[test]
    fn test_merge_into_empty_reports_every_field() {
        let mut stored = Record::new("User:1");
        let changed = stored.merge_from(&user("Ada"));
        assert_eq!(
            changed,
            ["age", "friend", "name"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<String>>()
        );
        assert_eq!(stored.field("name"), Some(&FieldValue::from("Ada")));
    }

    #[test]
    fn test_merge_preserves_untouched_fields() {
        let mut stored = user("Ada");
        let changed = stored.merge_from(&Record::new("User:1").with_field("name", "Grace"));

        assert_eq!(changed.len(), 1);
        assert!(changed.contains("name"));
        assert_eq!(stored.field("age"), Some(&FieldValue::Int(30)));
        assert_eq!(stored.field("name"), Some(&FieldValue::from("Grace")));
    }

    #[test]
    fn test_merge_same_values_reports_nothing() {
        let mut stored = user("Ada");
        assert!(stored.merge_from(&user("Ada")).is_empty());
    }

    #[test]
    fn test_changed_reference_is_a_change() {
        let mut stored = user("Ada");
        let incoming = Record::new("User:1").with_field("friend", FieldValue::reference("User:3"));
        let changed = stored.merge_from(&incoming);
        assert!(changed.contains("friend"));
    }

    #[test]
    fn test_merge_carries_mutation_id() {
        let id = Uuid::now_v7();
        let mut stored = user("Ada");
        stored.merge_from(&Record::new("User:1").with_mutation_id(id));
        assert_eq!(stored.mutation_id(), Some(id));

        stored.merge_from(&Record::new("User:1"));
        assert_eq!(stored.mutation_id(), Some(id));
    }

    #[test]
    fn test_references_walk_lists_and_objects() {
        let mut nested = BTreeMap::new();
        nested.insert("owner".to_string(), FieldValue::reference("User:9"));
        let record = Record::new("Query")
            .with_field(
                "users",
                vec![FieldValue::reference("User:1"), FieldValue::reference("User:2")],
            )
            .with_field("meta", FieldValue::Object(nested))
            .with_field("count", 2);

        let keys: Vec<String> = record
            .references()
            .iter()
            .map(|r| r.key().to_string())
            .collect();
        assert_eq!(keys, vec!["User:9", "User:1", "User:2"]);
    }

    #[test]
    fn test_size_estimate_grows_with_fields() {
        let small = Record::new("K").with_field("a", 1);
        let large = small.clone().with_field("bio", "x".repeat(100));
        assert!(large.size_estimate_bytes() > small.size_estimate_bytes() + 100);
    }

    #[test]
    fn test_ensure_finite_finds_nested_nan() {
        assert!(user("Ada").ensure_finite().is_ok());

        let record = Record::new("User:1").with_field(
            "scores",
            vec![FieldValue::Float(1.5), FieldValue::Float(f64::NAN)],
        );
        assert!(matches!(
            record.ensure_finite(),
            Err(crate::CacheError::Serialization(SerializationError::Encode { .. }))
        ));
    }

    #[test]
    fn test_option_into_field_value() {
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some("x")), FieldValue::from("x"));
    }
}
