//! Named, dynamically-typed channels for graphs that need more than the
//! three fixed channels on `VersionedState`.

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{ChannelError, ChannelWrite};

/// Object-safe view over one of the generalized channel variants, keyed by
/// name in a [`ChannelRegistry`].
pub trait DynChannel: Send + Sync {
    fn checkpoint(&self) -> Value;
    fn is_available(&self) -> bool;
    fn version(&self) -> u32;
    /// Apply this step's writes, returning whether the value changed.
    fn apply(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> Result<bool, ChannelError>;
    /// Drop this step's value if the slot holds an ephemeral channel. A
    /// no-op for every other channel kind.
    fn clear_ephemeral(&mut self) {}
    fn clone_box(&self) -> Box<dyn DynChannel>;
}

impl Clone for Box<dyn DynChannel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

struct LastValueSlot(super::LastValueChannel);

impl DynChannel for LastValueSlot {
    fn checkpoint(&self) -> Value {
        self.0.checkpoint()
    }
    fn is_available(&self) -> bool {
        self.0.is_available()
    }
    fn version(&self) -> u32 {
        self.0.version()
    }
    fn apply(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> Result<bool, ChannelError> {
        self.0.update("last_value", writes, next_version)
    }
    fn clone_box(&self) -> Box<dyn DynChannel> {
        Box::new(LastValueSlot(self.0.clone()))
    }
}

struct TopicSlot(super::TopicChannel);

impl DynChannel for TopicSlot {
    fn checkpoint(&self) -> Value {
        self.0.checkpoint()
    }
    fn is_available(&self) -> bool {
        self.0.is_available()
    }
    fn version(&self) -> u32 {
        self.0.version()
    }
    fn apply(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> Result<bool, ChannelError> {
        Ok(self.0.update(writes, next_version))
    }
    fn clone_box(&self) -> Box<dyn DynChannel> {
        Box::new(TopicSlot(self.0.clone()))
    }
}

struct BinaryOperatorAggregateSlot(super::BinaryOperatorAggregateChannel);

impl DynChannel for BinaryOperatorAggregateSlot {
    fn checkpoint(&self) -> Value {
        self.0.checkpoint()
    }
    fn is_available(&self) -> bool {
        self.0.is_available()
    }
    fn version(&self) -> u32 {
        self.0.version()
    }
    fn apply(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> Result<bool, ChannelError> {
        Ok(self.0.update(writes, next_version))
    }
    fn clone_box(&self) -> Box<dyn DynChannel> {
        Box::new(BinaryOperatorAggregateSlot(self.0.clone()))
    }
}

struct EphemeralValueSlot(super::EphemeralValueChannel);

impl DynChannel for EphemeralValueSlot {
    fn checkpoint(&self) -> Value {
        // Ephemeral channels never survive past the step that wrote them,
        // so there is nothing meaningful to checkpoint.
        Value::Null
    }
    fn is_available(&self) -> bool {
        self.0.is_available()
    }
    fn version(&self) -> u32 {
        self.0.version()
    }
    fn apply(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> Result<bool, ChannelError> {
        Ok(self.0.update(writes, next_version))
    }
    fn clear_ephemeral(&mut self) {
        self.0.clear();
    }
    fn clone_box(&self) -> Box<dyn DynChannel> {
        Box::new(EphemeralValueSlot(self.0.clone()))
    }
}

struct ContextSlot(super::ContextChannel);

impl DynChannel for ContextSlot {
    fn checkpoint(&self) -> Value {
        self.0.get().clone()
    }
    fn is_available(&self) -> bool {
        self.0.is_available()
    }
    fn version(&self) -> u32 {
        self.0.version()
    }
    fn apply(&mut self, writes: Vec<ChannelWrite>, _next_version: u32) -> Result<bool, ChannelError> {
        if writes.is_empty() {
            Ok(false)
        } else {
            Err(ChannelError::InvalidUpdate {
                channel: "context".to_string(),
                writer_count: writes.len(),
            })
        }
    }
    fn clone_box(&self) -> Box<dyn DynChannel> {
        Box::new(ContextSlot(self.0.clone()))
    }
}

/// Registry of named, arbitrary channels declared by a graph beyond the
/// three fixed ones on `VersionedState`. Each entry is independently
/// versioned and checkpointed.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    channels: FxHashMap<String, Box<dyn DynChannel>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.channels.iter().map(|(k, v)| (k, v.checkpoint())))
            .finish()
    }
}

impl PartialEq for ChannelRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.checkpoint_all() == other.checkpoint_all()
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_last_value(&mut self, name: impl Into<String>) -> &mut Self {
        self.channels.insert(
            name.into(),
            Box::new(LastValueSlot(super::LastValueChannel::new())),
        );
        self
    }

    pub fn register_topic(&mut self, name: impl Into<String>, accumulate: bool) -> &mut Self {
        self.channels.insert(
            name.into(),
            Box::new(TopicSlot(super::TopicChannel::new(accumulate))),
        );
        self
    }

    /// Register a channel that folds concurrent writes through a shared,
    /// pure, order-independent binary operator.
    pub fn register_binary_operator_aggregate(
        &mut self,
        name: impl Into<String>,
        op: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.channels.insert(
            name.into(),
            Box::new(BinaryOperatorAggregateSlot(
                super::BinaryOperatorAggregateChannel::new(op),
            )),
        );
        self
    }

    /// Register a channel whose value is scoped to a single superstep and
    /// cleared by [`Self::clear_ephemeral`] before the next one begins.
    pub fn register_ephemeral_value(&mut self, name: impl Into<String>) -> &mut Self {
        self.channels.insert(
            name.into(),
            Box::new(EphemeralValueSlot(super::EphemeralValueChannel::new())),
        );
        self
    }

    /// Register a read-only channel seeded once at graph start. Writes to
    /// it after registration are rejected by [`Self::apply`].
    pub fn register_context(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.channels.insert(
            name.into(),
            Box::new(ContextSlot(super::ContextChannel::new(value))),
        );
        self
    }

    pub fn apply(
        &mut self,
        name: &str,
        writes: Vec<ChannelWrite>,
        next_version: u32,
    ) -> Result<bool, ChannelError> {
        match self.channels.get_mut(name) {
            Some(channel) => channel.apply(writes, next_version),
            None => Err(ChannelError::Empty(name.to_string())),
        }
    }

    /// Current version of a registered channel, or `None` if `name` was
    /// never registered.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u32> {
        self.channels.get(name).map(|c| c.version())
    }

    /// Drop the value of every ephemeral channel. Called by the barrier at
    /// the end of each superstep so ephemeral writes never leak into the
    /// next step's input assembly.
    pub fn clear_ephemeral(&mut self) {
        for channel in self.channels.values_mut() {
            channel.clear_ephemeral();
        }
    }

    #[must_use]
    pub fn checkpoint_all(&self) -> FxHashMap<String, Value> {
        self.channels
            .iter()
            .map(|(name, channel)| (name.clone(), channel.checkpoint()))
            .collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_last_value_writes() {
        let mut registry = ChannelRegistry::new();
        registry.register_last_value("result");
        let changed = registry
            .apply(
                "result",
                vec![ChannelWrite {
                    writer: "node_a".into(),
                    value: Value::from(7),
                }],
                1,
            )
            .unwrap();
        assert!(changed);
        assert_eq!(registry.checkpoint_all().get("result"), Some(&Value::from(7)));
    }

    #[test]
    fn registry_errors_on_unknown_channel() {
        let mut registry = ChannelRegistry::new();
        let err = registry.apply("missing", vec![], 1).unwrap_err();
        assert!(matches!(err, ChannelError::Empty(_)));
    }

    #[test]
    fn registry_folds_binary_operator_aggregate_writes() {
        let mut registry = ChannelRegistry::new();
        registry.register_binary_operator_aggregate("total", |a, b| {
            Value::from(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
        });
        registry
            .apply(
                "total",
                vec![
                    ChannelWrite {
                        writer: "a".into(),
                        value: Value::from(2),
                    },
                    ChannelWrite {
                        writer: "b".into(),
                        value: Value::from(3),
                    },
                ],
                1,
            )
            .unwrap();
        assert_eq!(registry.checkpoint_all().get("total"), Some(&Value::from(5)));
        assert_eq!(registry.version_of("total"), Some(1));
    }

    #[test]
    fn registry_clears_ephemeral_channels_between_steps() {
        let mut registry = ChannelRegistry::new();
        registry.register_ephemeral_value("scratch");
        registry
            .apply(
                "scratch",
                vec![ChannelWrite {
                    writer: "a".into(),
                    value: Value::from("temp"),
                }],
                1,
            )
            .unwrap();
        registry.clear_ephemeral();
        let err = registry
            .apply("scratch", vec![], 2)
            .expect("no-op apply on empty ephemeral channel should succeed");
        assert!(!err);
    }

    #[test]
    fn registry_context_channel_rejects_writes_after_registration() {
        let mut registry = ChannelRegistry::new();
        registry.register_context("run_config", Value::from("prod"));
        assert_eq!(
            registry.checkpoint_all().get("run_config"),
            Some(&Value::from("prod"))
        );
        let err = registry
            .apply(
                "run_config",
                vec![ChannelWrite {
                    writer: "a".into(),
                    value: Value::from("staging"),
                }],
                1,
            )
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUpdate { .. }));
    }

    #[test]
    fn registry_is_cloneable_and_compares_by_checkpoint() {
        let mut registry = ChannelRegistry::new();
        registry.register_last_value("result");
        registry
            .apply(
                "result",
                vec![ChannelWrite {
                    writer: "a".into(),
                    value: Value::from(1),
                }],
                1,
            )
            .unwrap();
        let cloned = registry.clone();
        assert_eq!(registry, cloned);
    }
}
