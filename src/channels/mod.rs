//! Channel algebra: versioned, reducer-governed storage cells that make up
//! workflow state.
//!
//! Two layers live here:
//! - the concrete [`Channel`] trait plus the three built-in channels
//!   ([`MessagesChannel`], [`ExtrasChannel`], [`ErrorsChannel`]) that back
//!   `VersionedState`. These are what most node and barrier code touches.
//! - a generalized channel algebra ([`LastValueChannel`], [`TopicChannel`],
//!   [`BinaryOperatorAggregateChannel`], [`EphemeralValueChannel`],
//!   [`ContextChannel`]) for graphs that declare their own named channels
//!   through a [`ChannelRegistry`], mirroring how the fixed channels reduce
//!   but without requiring a dedicated struct field per channel.
//!
//! Versions are never invented here. Channels only ever report "did my value
//! change", and it is up to whoever applies the update (the barrier, backed
//! by the active checkpointer) to decide what the next version number is.

pub mod errors;
mod registry;

pub use registry::{ChannelRegistry, DynChannel};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;
use errors::ErrorEvent;

/// Errors raised while applying an update to a channel.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A `LastValue`-style channel received more than one write in the same
    /// step with no reducer registered to resolve the conflict.
    #[error("channel {channel:?} received {writer_count} concurrent writes with no reducer")]
    #[diagnostic(
        code(weavegraph::channels::invalid_update),
        help("Register a reducer for this channel, or route the writes through a Topic/BinaryOperatorAggregate channel instead")
    )]
    InvalidUpdate { channel: String, writer_count: usize },

    /// A channel was read before anything was ever written to it.
    #[error("channel {0:?} has no value yet")]
    #[diagnostic(code(weavegraph::channels::empty))]
    Empty(String),

    /// Deserializing a checkpointed value back into a channel failed.
    #[error("failed to restore channel {channel:?} from checkpoint: {message}")]
    #[diagnostic(code(weavegraph::channels::restore))]
    Restore { channel: String, message: String },
}

/// Versioned access to a single piece of workflow state.
///
/// Every channel pairs a value with a monotonically increasing version
/// number. `set_version` is a blunt setter used by the barrier after it has
/// already decided (by comparing before/after snapshots) that a change
/// occurred - channels never bump their own version.
pub trait Channel {
    type Data;

    fn version(&self) -> u32;
    fn set_version(&mut self, version: u32);
    fn get(&self) -> &Self::Data;
    fn get_mut(&mut self) -> &mut Self::Data;

    fn snapshot(&self) -> Self::Data
    where
        Self::Data: Clone,
    {
        self.get().clone()
    }
}

macro_rules! versioned_channel {
    ($(#[$meta:meta])* $name:ident, $data:ty) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Default)]
        pub struct $name {
            data: $data,
            version: u32,
        }

        impl $name {
            #[must_use]
            pub fn new(data: $data, version: u32) -> Self {
                Self { data, version }
            }
        }

        impl Channel for $name {
            type Data = $data;

            fn version(&self) -> u32 {
                self.version
            }

            fn set_version(&mut self, version: u32) {
                self.version = version;
            }

            fn get(&self) -> &Self::Data {
                &self.data
            }

            fn get_mut(&mut self) -> &mut Self::Data {
                &mut self.data
            }
        }

        impl std::ops::Deref for $name {
            type Target = $data;
            fn deref(&self) -> &Self::Target {
                &self.data
            }
        }
    };
}

versioned_channel!(
    /// Append-only conversation history.
    MessagesChannel,
    Vec<Message>
);
versioned_channel!(
    /// Shallow-merged JSON metadata bag.
    ExtrasChannel,
    FxHashMap<String, Value>
);
versioned_channel!(
    /// Append-only log of recoverable error events.
    ErrorsChannel,
    Vec<ErrorEvent>
);

/// A single writer's contribution to a channel during one superstep.
#[derive(Clone, Debug)]
pub struct ChannelWrite {
    pub writer: String,
    pub value: Value,
}

/// Last-value-wins channel: exactly one writer per step, or a registered
/// reducer must resolve ties. Mirrors LangGraph's `LastValue`.
#[derive(Clone, Debug, Default)]
pub struct LastValueChannel {
    value: Option<Value>,
    version: u32,
}

impl LastValueChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }

    /// Apply this step's writes. Zero writes is a no-op; exactly one write
    /// replaces the value; more than one write without a caller-supplied
    /// merge function is rejected.
    pub fn update(
        &mut self,
        channel_name: &str,
        writes: Vec<ChannelWrite>,
        next_version: u32,
    ) -> Result<bool, ChannelError> {
        match writes.len() {
            0 => Ok(false),
            1 => {
                self.value = Some(writes.into_iter().next().unwrap().value);
                self.version = next_version;
                Ok(true)
            }
            n => Err(ChannelError::InvalidUpdate {
                channel: channel_name.to_string(),
                writer_count: n,
            }),
        }
    }

    pub fn checkpoint(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }

    pub fn from_checkpoint(value: Value, version: u32) -> Self {
        Self {
            value: if value.is_null() { None } else { Some(value) },
            version,
        }
    }
}

/// Accumulates every write made to it across a superstep into an ordered
/// list, then clears after each read unless `accumulate` keeps history.
#[derive(Clone, Debug, Default)]
pub struct TopicChannel {
    values: Vec<Value>,
    accumulate: bool,
    version: u32,
}

impl TopicChannel {
    #[must_use]
    pub fn new(accumulate: bool) -> Self {
        Self {
            values: Vec::new(),
            accumulate,
            version: 0,
        }
    }

    #[must_use]
    pub fn get(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn update(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> bool {
        if writes.is_empty() {
            return false;
        }
        if !self.accumulate {
            self.values.clear();
        }
        self.values.extend(writes.into_iter().map(|w| w.value));
        self.version = next_version;
        true
    }

    pub fn checkpoint(&self) -> Value {
        Value::Array(self.values.clone())
    }

    pub fn from_checkpoint(value: Value, accumulate: bool, version: u32) -> Self {
        let values = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Self {
            values,
            accumulate,
            version,
        }
    }
}

/// A binary associative operator shared by every writer to fold this
/// step's writes into the running total. `op` must be pure and
/// order-independent to keep barrier application deterministic.
///
/// `op` is reference-counted rather than boxed so the channel (and, in
/// turn, a [`super::ChannelRegistry`] holding it) stays `Clone`.
pub struct BinaryOperatorAggregateChannel {
    value: Option<Value>,
    op: std::sync::Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>,
    version: u32,
}

impl std::fmt::Debug for BinaryOperatorAggregateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryOperatorAggregateChannel")
            .field("value", &self.value)
            .field("version", &self.version)
            .finish()
    }
}

impl Clone for BinaryOperatorAggregateChannel {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            op: self.op.clone(),
            version: self.version,
        }
    }
}

impl BinaryOperatorAggregateChannel {
    pub fn new(op: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static) -> Self {
        Self {
            value: None,
            op: std::sync::Arc::new(op),
            version: 0,
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }

    pub fn update(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> bool {
        if writes.is_empty() {
            return false;
        }
        for write in writes {
            self.value = Some(match &self.value {
                Some(current) => (self.op)(current, &write.value),
                None => write.value,
            });
        }
        self.version = next_version;
        true
    }

    pub fn checkpoint(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }
}

/// Holds a value only for the duration of the superstep that wrote it; it
/// is never checkpointed and is cleared before the next step begins.
#[derive(Clone, Debug, Default)]
pub struct EphemeralValueChannel {
    value: Option<Value>,
    version: u32,
}

impl EphemeralValueChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }

    pub fn update(&mut self, writes: Vec<ChannelWrite>, next_version: u32) -> bool {
        self.value = writes.into_iter().next_back().map(|w| w.value);
        let changed = self.value.is_some();
        if changed {
            self.version = next_version;
        }
        changed
    }

    /// Drop the value at the end of a superstep. Ephemeral channels never
    /// survive into the next step's input assembly.
    pub fn clear(&mut self) {
        self.value = None;
    }
}

/// Read-only, run-scoped configuration injected once at graph start (e.g.
/// the invoking user id, feature flags). Writes after construction are
/// rejected.
#[derive(Clone, Debug)]
pub struct ContextChannel {
    value: Value,
    version: u32,
}

impl ContextChannel {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self { value, version: 1 }
    }

    #[must_use]
    pub fn get(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.value.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_channel_tracks_version_and_dereferences() {
        let mut ch = MessagesChannel::new(vec![Message::user("hi")], 1);
        assert_eq!(ch.len(), 1);
        ch.get_mut().push(Message::assistant("yo"));
        assert_eq!(Channel::get(&ch).len(), 2);
        ch.set_version(2);
        assert_eq!(ch.version(), 2);
    }

    #[test]
    fn last_value_channel_rejects_concurrent_writes_without_reducer() {
        let mut ch = LastValueChannel::new();
        let writes = vec![
            ChannelWrite {
                writer: "a".into(),
                value: Value::from(1),
            },
            ChannelWrite {
                writer: "b".into(),
                value: Value::from(2),
            },
        ];
        let err = ch.update("result", writes, 1).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUpdate { writer_count: 2, .. }));
    }

    #[test]
    fn last_value_channel_accepts_single_write() {
        let mut ch = LastValueChannel::new();
        let writes = vec![ChannelWrite {
            writer: "a".into(),
            value: Value::from(42),
        }];
        assert!(ch.update("result", writes, 1).unwrap());
        assert_eq!(ch.get(), Some(&Value::from(42)));
        assert_eq!(ch.version(), 1);
    }

    #[test]
    fn topic_channel_clears_unless_accumulating() {
        let mut ch = TopicChannel::new(false);
        ch.update(
            vec![ChannelWrite {
                writer: "a".into(),
                value: Value::from(1),
            }],
            1,
        );
        assert_eq!(ch.get(), &[Value::from(1)]);
        ch.update(
            vec![ChannelWrite {
                writer: "b".into(),
                value: Value::from(2),
            }],
            2,
        );
        assert_eq!(ch.get(), &[Value::from(2)]);
    }

    #[test]
    fn topic_channel_accumulates_when_configured() {
        let mut ch = TopicChannel::new(true);
        ch.update(
            vec![ChannelWrite {
                writer: "a".into(),
                value: Value::from(1),
            }],
            1,
        );
        ch.update(
            vec![ChannelWrite {
                writer: "b".into(),
                value: Value::from(2),
            }],
            2,
        );
        assert_eq!(ch.get(), &[Value::from(1), Value::from(2)]);
    }

    #[test]
    fn binary_operator_aggregate_folds_writes() {
        let mut ch = BinaryOperatorAggregateChannel::new(|a, b| {
            Value::from(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
        });
        ch.update(
            vec![
                ChannelWrite {
                    writer: "a".into(),
                    value: Value::from(1),
                },
                ChannelWrite {
                    writer: "b".into(),
                    value: Value::from(2),
                },
            ],
            1,
        );
        assert_eq!(ch.get(), Some(&Value::from(3)));
    }

    #[test]
    fn ephemeral_value_channel_clears_between_steps() {
        let mut ch = EphemeralValueChannel::new();
        ch.update(
            vec![ChannelWrite {
                writer: "a".into(),
                value: Value::from("scratch"),
            }],
            1,
        );
        assert!(ch.is_available());
        ch.clear();
        assert!(!ch.is_available());
    }

    #[test]
    fn context_channel_is_read_only_after_construction() {
        let ch = ContextChannel::new(Value::from("run-scoped"));
        assert!(ch.is_available());
        assert_eq!(ch.get(), &Value::from("run-scoped"));
    }
}
