//! Cross-thread key/value store for long-lived memory.
//!
//! Unlike channels, which live and die with a single run, a [`Store`] holds
//! state whose lifecycle is independent of any thread or run: user
//! preferences, long-term memories, anything a node wants to read or write
//! regardless of which session is currently executing. Keys are scoped by a
//! hierarchical namespace path, support an optional TTL, and can be listed or
//! searched by exact-match/operator filters.
//!
//! The reference implementation here is in-memory, guarded by a
//! [`parking_lot::RwLock`] rather than `std::sync`, matching the rest of the
//! crate's preference for `parking_lot` (see [`crate::event_bus::hub`]).
//! Semantic `query` search is left as a trait hook with no embedding backend
//! wired in; durable backends are out of scope.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A namespace path: an ordered sequence of path segments, e.g.
/// `["users", "123", "preferences"]`.
pub type Namespace = Vec<String>;

/// Errors raised by [`Store`] operations.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No item exists at the given namespace/key.
    #[error("no value at namespace {namespace:?} key {key:?}")]
    #[diagnostic(code(weavegraph::store::not_found))]
    NotFound { namespace: Namespace, key: String },
}

/// A single item stored under a namespace/key pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreItem {
    pub namespace: Namespace,
    pub key: String,
    pub value: Value,
    /// Optional fields extracted from `value` for exact-match search, kept
    /// alongside the value rather than recomputed on every search.
    #[serde(default)]
    pub index: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoreItem {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Options accepted by [`Store::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Value used for exact-match filtering in [`Store::search`].
    pub index: Option<Value>,
    /// Minutes until the item expires; `None` means it never expires.
    pub ttl_minutes: Option<i64>,
}

/// Options accepted by [`Store::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Reset the item's TTL countdown to now on read.
    pub refresh_ttl: bool,
}

/// A filter operator applied to a field of [`StoreItem::index`] (or, absent
/// an index, the stored value itself) during [`Store::search`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Field equals value exactly.
    Eq(Value),
    /// Field (expected to be a string or array) contains value.
    Contains(Value),
}

/// Options accepted by [`Store::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Exact-match or operator filters keyed by field name.
    pub filter: Vec<(String, FilterOp)>,
    /// Free-text/semantic query. No embedding backend is implemented; a
    /// query is currently matched as a case-insensitive substring of the
    /// item's serialized value, which is enough to exercise the contract.
    pub query: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub refresh_ttl: bool,
}

/// Options accepted by [`Store::list_namespaces`].
#[derive(Debug, Clone, Default)]
pub struct ListNamespacesOptions {
    pub prefix: Option<Namespace>,
    pub suffix: Option<Namespace>,
    pub max_depth: Option<usize>,
    pub limit: usize,
    pub offset: usize,
}

fn starts_with(path: &[String], prefix: &[String]) -> bool {
    path.len() >= prefix.len() && path[..prefix.len()] == *prefix
}

fn ends_with(path: &[String], suffix: &[String]) -> bool {
    path.len() >= suffix.len() && path[path.len() - suffix.len()..] == *suffix
}

fn matches_filter(item: &StoreItem, field: &str, op: &FilterOp) -> bool {
    let haystack = item.index.as_ref().unwrap_or(&item.value);
    let field_value = haystack.get(field);
    match (op, field_value) {
        (FilterOp::Eq(expected), Some(actual)) => actual == expected,
        (FilterOp::Contains(needle), Some(Value::String(s))) => {
            needle.as_str().is_some_and(|n| s.contains(n))
        }
        (FilterOp::Contains(needle), Some(Value::Array(items))) => items.contains(needle),
        _ => false,
    }
}

/// In-memory, namespace-scoped key/value store.
///
/// Namespace/key pairs are kept in a `BTreeMap` so that prefix/suffix scans
/// in [`Store::list_namespaces`] and [`Store::search`] iterate in a stable,
/// lexicographic order.
#[derive(Debug, Default)]
pub struct Store {
    items: RwLock<BTreeMap<(Namespace, String), StoreItem>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the value at `namespace`/`key`.
    pub fn put(&self, namespace: Namespace, key: String, value: Value, opts: PutOptions) {
        let now = Utc::now();
        let expires_at = opts
            .ttl_minutes
            .map(|minutes| now + Duration::minutes(minutes));
        let mut items = self.items.write();
        let created_at = items
            .get(&(namespace.clone(), key.clone()))
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        items.insert(
            (namespace.clone(), key.clone()),
            StoreItem {
                namespace,
                key,
                value,
                index: opts.index,
                created_at,
                updated_at: now,
                expires_at,
            },
        );
    }

    /// Fetches the item at `namespace`/`key`, or [`StoreError::NotFound`] if
    /// absent or expired.
    pub fn get(
        &self,
        namespace: &[String],
        key: &str,
        opts: GetOptions,
    ) -> Result<StoreItem, StoreError> {
        let now = Utc::now();
        let id = (namespace.to_vec(), key.to_string());
        let mut items = self.items.write();
        let item = items.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_vec(),
            key: key.to_string(),
        })?;
        if item.is_expired(now) {
            items.remove(&id);
            return Err(StoreError::NotFound {
                namespace: namespace.to_vec(),
                key: key.to_string(),
            });
        }
        if opts.refresh_ttl {
            if let Some(expires_at) = item.expires_at {
                let ttl = expires_at - item.updated_at;
                item.expires_at = Some(now + ttl);
            }
            item.updated_at = now;
        }
        Ok(item.clone())
    }

    /// Removes the item at `namespace`/`key`, if present.
    pub fn delete(&self, namespace: &[String], key: &str) {
        self.items
            .write()
            .remove(&(namespace.to_vec(), key.to_string()));
    }

    /// Returns items under `namespace_prefix` matching `opts`, evicting any
    /// expired items encountered along the way.
    pub fn search(&self, namespace_prefix: &[String], opts: SearchOptions) -> Vec<StoreItem> {
        let now = Utc::now();
        let mut items = self.items.write();
        let expired: Vec<_> = items
            .iter()
            .filter(|(_, item)| item.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            items.remove(&id);
        }

        let mut matches: Vec<StoreItem> = items
            .iter_mut()
            .filter(|((ns, _), _)| starts_with(ns, namespace_prefix))
            .filter(|(_, item)| {
                opts.filter
                    .iter()
                    .all(|(field, op)| matches_filter(item, field, op))
            })
            .filter(|(_, item)| {
                opts.query.as_ref().is_none_or(|q| {
                    serde_json::to_string(&item.value)
                        .unwrap_or_default()
                        .to_lowercase()
                        .contains(&q.to_lowercase())
                })
            })
            .map(|(_, item)| {
                if opts.refresh_ttl {
                    if let Some(expires_at) = item.expires_at {
                        let ttl = expires_at - item.updated_at;
                        item.expires_at = Some(now + ttl);
                    }
                    item.updated_at = now;
                }
                item.clone()
            })
            .collect();

        matches.sort_by(|a, b| {
            (a.namespace.clone(), a.key.clone()).cmp(&(b.namespace.clone(), b.key.clone()))
        });
        let limit = if opts.limit == 0 {
            matches.len()
        } else {
            opts.limit
        };
        matches.into_iter().skip(opts.offset).take(limit).collect()
    }

    /// Lists distinct namespaces holding at least one live (non-expired)
    /// item, optionally filtered by `prefix`/`suffix` and truncated to
    /// `max_depth` segments.
    pub fn list_namespaces(&self, opts: ListNamespacesOptions) -> Vec<Namespace> {
        let now = Utc::now();
        let items = self.items.read();
        let mut namespaces: Vec<Namespace> = items
            .iter()
            .filter(|(_, item)| !item.is_expired(now))
            .map(|((ns, _), _)| ns)
            .filter(|ns| {
                opts.prefix
                    .as_ref()
                    .is_none_or(|prefix| starts_with(ns, prefix))
            })
            .filter(|ns| {
                opts.suffix
                    .as_ref()
                    .is_none_or(|suffix| ends_with(ns, suffix))
            })
            .map(|ns| match opts.max_depth {
                Some(depth) => ns.iter().take(depth).cloned().collect(),
                None => ns.clone(),
            })
            .collect();
        namespaces.sort();
        namespaces.dedup();

        let limit = if opts.limit == 0 {
            namespaces.len()
        } else {
            opts.limit
        };
        namespaces.into_iter().skip(opts.offset).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns(parts: &[&str]) -> Namespace {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = Store::new();
        store.put(
            ns(&["users", "1"]),
            "name".into(),
            json!("Ada"),
            PutOptions::default(),
        );
        let item = store.get(&ns(&["users", "1"]), "name", GetOptions::default());
        assert_eq!(item.unwrap().value, json!("Ada"));
    }

    #[test]
    fn get_missing_key_errors() {
        let store = Store::new();
        let err = store.get(&ns(&["users", "1"]), "name", GetOptions::default());
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn delete_removes_item() {
        let store = Store::new();
        store.put(
            ns(&["users", "1"]),
            "name".into(),
            json!("Ada"),
            PutOptions::default(),
        );
        store.delete(&ns(&["users", "1"]), "name");
        assert!(store
            .get(&ns(&["users", "1"]), "name", GetOptions::default())
            .is_err());
    }

    #[test]
    fn expired_item_is_not_returned() {
        let store = Store::new();
        store.put(
            ns(&["users", "1"]),
            "name".into(),
            json!("Ada"),
            PutOptions {
                index: None,
                ttl_minutes: Some(-1),
            },
        );
        assert!(store
            .get(&ns(&["users", "1"]), "name", GetOptions::default())
            .is_err());
    }

    #[test]
    fn search_filters_by_namespace_prefix_and_exact_field() {
        let store = Store::new();
        store.put(
            ns(&["users", "1"]),
            "profile".into(),
            json!({"role": "admin"}),
            PutOptions {
                index: Some(json!({"role": "admin"})),
                ttl_minutes: None,
            },
        );
        store.put(
            ns(&["users", "2"]),
            "profile".into(),
            json!({"role": "member"}),
            PutOptions {
                index: Some(json!({"role": "member"})),
                ttl_minutes: None,
            },
        );

        let results = store.search(
            &ns(&["users"]),
            SearchOptions {
                filter: vec![("role".into(), FilterOp::Eq(json!("admin")))],
                query: None,
                limit: 10,
                offset: 0,
                refresh_ttl: false,
            },
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].namespace, ns(&["users", "1"]));
    }

    #[test]
    fn list_namespaces_dedupes_and_respects_prefix() {
        let store = Store::new();
        store.put(ns(&["a", "b"]), "k1".into(), json!(1), PutOptions::default());
        store.put(ns(&["a", "b"]), "k2".into(), json!(2), PutOptions::default());
        store.put(ns(&["a", "c"]), "k1".into(), json!(3), PutOptions::default());

        let namespaces = store.list_namespaces(ListNamespacesOptions {
            prefix: Some(ns(&["a"])),
            limit: 0,
            ..Default::default()
        });
        assert_eq!(namespaces, vec![ns(&["a", "b"]), ns(&["a", "c"])]);
    }

    #[test]
    fn list_namespaces_truncates_to_max_depth() {
        let store = Store::new();
        store.put(ns(&["a", "b", "c"]), "k".into(), json!(1), PutOptions::default());

        let namespaces = store.list_namespaces(ListNamespacesOptions {
            max_depth: Some(2),
            limit: 0,
            ..Default::default()
        });
        assert_eq!(namespaces, vec![ns(&["a", "b"])]);
    }
}
