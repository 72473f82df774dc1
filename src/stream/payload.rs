//! Turning host records into stream entry fields.
//!
//! Records arrive as JSON objects. Either every top-level field becomes an
//! entry field, or a single nested object field supplies them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Where the fields of an entry come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// All top-level fields of the record.
    #[default]
    AllFields,
    /// The fields of the JSON object stored under this record field.
    JsonField(String),
}

impl MessageSource {
    /// Extract entry fields from a record.
    ///
    /// Fails with `InvalidArgument` when the record (or the selected field)
    /// is not a JSON object, or when it has no fields.
    pub fn extract(&self, record: &Value) -> Result<Vec<(String, String)>> {
        let object = match self {
            MessageSource::AllFields => record.as_object().ok_or_else(|| {
                Error::InvalidArgument("record must be a JSON object".to_string())
            })?,
            MessageSource::JsonField(field) => record
                .get(field)
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("Field \"{}\" should be a JSON object", field))
                })?,
        };

        let fields = flatten_object(object);
        if fields.is_empty() {
            return Err(Error::InvalidArgument(
                "Empty payload cannot be sent to a stream".to_string(),
            ));
        }
        Ok(fields)
    }
}

/// Stringify each value of a JSON object, in the object's iteration order.
///
/// Strings are used as-is; everything else becomes its compact JSON text.
pub fn flatten_object(object: &Map<String, Value>) -> Vec<(String, String)> {
    object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
