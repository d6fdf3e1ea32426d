//! Conversion of record fields to and from a storable byte form.

use crate::{CacheResult, Fields, Record, SerializationError};

/// Turns record fields into bytes a durable tier can store, and back.
///
/// Implementations must be `Send + Sync`; one serializer is shared by every
/// tier built from the same context.
pub trait FieldSerializer: Send + Sync {
    /// Encode the fields of `record`. The key is not part of the output.
    fn to_storable(&self, record: &Record) -> CacheResult<Vec<u8>>;

    /// Decode fields previously produced by [`FieldSerializer::to_storable`].
    fn from_storable(&self, key: &str, bytes: &[u8]) -> CacheResult<Record>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// JSON field serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFieldSerializer;

impl JsonFieldSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl FieldSerializer for JsonFieldSerializer {
    fn to_storable(&self, record: &Record) -> CacheResult<Vec<u8>> {
        // serde_json writes NaN and infinities as null, which would not decode back.
        record.ensure_finite()?;
        serde_json::to_vec(record.fields()).map_err(|e| {
            SerializationError::Encode {
                key: record.key().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn from_storable(&self, key: &str, bytes: &[u8]) -> CacheResult<Record> {
        let fields: Fields = serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode {
            reason: e.to_string(),
        })?;
        Ok(Record::from_fields(key, fields))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
