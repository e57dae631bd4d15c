// flowline/src/core/envelope.rs

//! Defines `Envelope`, the JSON-shaped payload unit that flows between stages.
//!
//! An envelope holds raw bytes. Its shape is never checked when it is built from
//! bytes; each consumer validates it lazily through `extract_objects`, `parse`
//! or `to_value`.

use crate::error::{FlowError, FlowResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Payload of the synthetic start record handed to the first stage of a run.
const START_PAYLOAD: &[u8] = b"null";

/// A self-describing record payload: a JSON object, an array of objects sharing
/// one key set, or a JSON scalar / array of scalars.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Envelope(Vec<u8>);

impl Envelope {
  /// Serializes `value` into an envelope.
  pub fn wrap<T: Serialize + ?Sized>(value: &T) -> FlowResult<Self> {
    serde_json::to_vec(value)
      .map(Envelope)
      .map_err(|source| FlowError::Encode { source })
  }

  /// Builds an envelope from raw bytes without validating them.
  pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
    Envelope(bytes.into())
  }

  /// The record the first stage of a pipeline receives exactly once per run.
  pub fn start() -> Self {
    Envelope(START_PAYLOAD.to_vec())
  }

  /// `true` for a payload of JSON `null`. An upstream record carrying `null`
  /// looks the same, so only the first stage of a pipeline can rely on this.
  pub fn is_start(&self) -> bool {
    self.0 == START_PAYLOAD
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Decodes the payload into a caller-chosen shape.
  pub fn parse<T: DeserializeOwned>(&self) -> FlowResult<T> {
    serde_json::from_slice(&self.0).map_err(|e| {
      FlowError::decode(format!(
        "expected {}: {}",
        std::any::type_name::<T>(),
        e
      ))
    })
  }

  /// Decodes the payload as an untyped JSON value.
  pub fn to_value(&self) -> FlowResult<Value> {
    self.parse::<Value>()
  }

  /// Returns the objects held by this envelope, in order.
  ///
  /// Succeeds for a single object (yielding one entry) and for an array whose
  /// elements are all objects. Scalars, arrays of scalars and mixed arrays are
  /// rejected with `FlowError::Decode`.
  ///
  /// Callers emitting tabular output must not assume a union of keys: every
  /// object is expected to carry the key set of the first one.
  pub fn extract_objects(&self) -> FlowResult<Vec<Map<String, Value>>> {
    match self.to_value()? {
      Value::Object(object) => Ok(vec![object]),
      Value::Array(items) => items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
          Value::Object(object) => Ok(object),
          other => Err(FlowError::decode(format!(
            "array element {} is {}, expected an object",
            idx,
            json_kind(&other)
          ))),
        })
        .collect(),
      other => Err(FlowError::decode(format!(
        "payload is {}, expected an object or an array of objects",
        json_kind(&other)
      ))),
    }
  }
}

/// Short human-readable name of a JSON value's kind, used in error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

impl From<Vec<u8>> for Envelope {
  fn from(bytes: Vec<u8>) -> Self {
    Envelope(bytes)
  }
}

impl From<&str> for Envelope {
  fn from(text: &str) -> Self {
    Envelope(text.as_bytes().to_vec())
  }
}

impl AsRef<[u8]> for Envelope {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl fmt::Display for Envelope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&String::from_utf8_lossy(&self.0))
  }
}

impl fmt::Debug for Envelope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Envelope")
      .field(&String::from_utf8_lossy(&self.0))
      .finish()
  }
}
