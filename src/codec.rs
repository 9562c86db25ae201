//! Conversion between the store's untyped documents and typed records.
//!
//! Batch decoding is deliberately best-effort: one malformed document is
//! dropped silently instead of blanking a whole list. A query-level failure
//! (transport, server rejection) is a different thing and propagates as an
//! error from the operation that hit it.
//!
//! The document identifier is never part of the encoded payload. It lives on
//! [`TypedRecord`], next to the decoded body, and is assigned by the store
//! (or by the path the caller writes to) — never by the model itself.

use crate::error::{DocLinkError, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Field map of an encoded document body.
pub type FieldMap = Map<String, JsonValue>;

/// An untyped document as the backend hands it over: identifier plus field
/// map. The identifier is `None` for values that have not been stored yet.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawDocument {
    /// Store-assigned document identifier.
    pub id: Option<String>,
    /// Untyped document body.
    pub fields: FieldMap,
}

impl RawDocument {
    /// A document with an identifier.
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        RawDocument { id: Some(id.into()), fields }
    }

    /// A document body without an identifier (not yet stored).
    pub fn unidentified(fields: FieldMap) -> Self {
        RawDocument { id: None, fields }
    }
}

/// A decoded domain object plus its document identifier.
///
/// The identifier is optional: absent until the store assigns one on
/// creation. Delta reconciliation matches records by identifier equality
/// only — see [`reconcile`](crate::reconcile).
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord<T> {
    /// Document identifier, when known.
    pub id: Option<String>,
    /// The decoded domain object.
    pub data: T,
}

impl<T> TypedRecord<T> {
    /// Pair a decoded value with its identifier.
    pub fn new(id: impl Into<String>, data: T) -> Self {
        TypedRecord { id: Some(id.into()), data }
    }

    /// A record that has not been stored yet.
    pub fn unidentified(data: T) -> Self {
        TypedRecord { id: None, data }
    }
}

/// Decode one document into a typed record.
pub fn decode_one<T: DeserializeOwned>(doc: &RawDocument) -> Result<TypedRecord<T>> {
    let data: T = serde_json::from_value(JsonValue::Object(doc.fields.clone()))
        .map_err(|e| DocLinkError::Decode(format!("document {:?}: {}", doc.id, e)))?;
    Ok(TypedRecord { id: doc.id.clone(), data })
}

/// Decode a batch of documents, silently dropping the ones that fail.
///
/// The well-formed documents keep their original relative order. A dropped
/// document is logged at debug level and otherwise invisible to the caller.
pub fn decode_many<T: DeserializeOwned>(docs: &[RawDocument]) -> Vec<TypedRecord<T>> {
    docs.iter()
        .filter_map(|doc| match decode_one(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("[CODEC] Dropping undecodable document: {}", e);
                None
            },
        })
        .collect()
}

/// Encode a model into a document field map.
///
/// Fails with [`DocLinkError::Decode`] when the model does not serialize to
/// a JSON object (documents are field maps, not scalars or arrays).
pub fn encode<T: Serialize>(value: &T) -> Result<FieldMap> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(DocLinkError::Decode(format!(
            "expected model to encode to an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
