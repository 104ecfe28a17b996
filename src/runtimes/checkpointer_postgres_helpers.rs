//! JSON (de)serialization helpers shared by the `PostgresCheckpointer` methods.
//!
//! Postgres stores the persisted columns as native `jsonb`, so these helpers
//! work in terms of `serde_json::Value` directly (contrast with
//! `checkpointer_sqlite_helpers`, where SQLite's TEXT columns require an
//! extra string round-trip).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::checkpointer::{CheckpointerError, Result};

pub(crate) fn serialize_json<T: Serialize>(value: &T, field: &str) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| CheckpointerError::Other {
        message: format!("serialize {field}: {e}"),
    })
}

pub(crate) fn deserialize_json_value<T: DeserializeOwned>(value: Value, field: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CheckpointerError::Other {
        message: format!("deserialize {field}: {e}"),
    })
}

pub(crate) fn require_json_field(value: Option<Value>, field: &str) -> Result<Value> {
    value.ok_or_else(|| CheckpointerError::Other {
        message: format!("missing field: {field}"),
    })
}
