//! JSON (de)serialization helpers shared by the `SQLiteCheckpointer` methods.
//!
//! SQLite stores the persisted columns as TEXT, so these helpers work in
//! terms of `String` rather than `serde_json::Value` (contrast with
//! `checkpointer_postgres_helpers`, where the columns are native `jsonb`).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::checkpointer::{CheckpointerError, Result};

pub(crate) fn serialize_json<T: Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CheckpointerError::Other {
        message: format!("serialize {field}: {e}"),
    })
}

pub(crate) fn deserialize_json<T: DeserializeOwned>(json: &str, field: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| CheckpointerError::Other {
        message: format!("deserialize {field}: {e}"),
    })
}

pub(crate) fn deserialize_json_value<T: DeserializeOwned>(value: Value, field: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CheckpointerError::Other {
        message: format!("deserialize {field}: {e}"),
    })
}

pub(crate) fn require_json_field(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| CheckpointerError::Other {
        message: format!("missing field: {field}"),
    })
}
