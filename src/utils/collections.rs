//! Small helpers for the `FxHashMap`-based collections used across state and
//! persistence types.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Creates an empty extra-data map with the same hasher as the rest of the
/// crate, so call sites don't need to spell out `FxHashMap::default()`.
#[must_use]
pub fn new_extra_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}

/// Creates an extra-data map pre-populated from an iterator of key/value pairs.
#[must_use]
pub fn extra_map_from<I>(entries: I) -> FxHashMap<String, Value>
where
    I: IntoIterator<Item = (String, Value)>,
{
    entries.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_extra_map_is_empty() {
        assert!(new_extra_map().is_empty());
    }

    #[test]
    fn extra_map_from_collects_entries() {
        let map = extra_map_from(vec![("a".to_string(), Value::from(1))]);
        assert_eq!(map.get("a"), Some(&Value::from(1)));
    }
}
