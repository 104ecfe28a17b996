//! Control-flow primitives emitted by nodes to influence subsequent scheduling.
//!
//! Frontier commands are kept separate from state updates so nodes can
//! express routing intent without mutating application state directly. The
//! barrier aggregates these directives in a deterministic order and the runner
//! reconciles them with unconditional / conditional edges.

use rustc_hash::FxHashMap;

use crate::types::NodeKind;

/// A dynamic edge to another node carrying its own input payload, bypassing
/// the static edge table. Mirrors LangGraph's `Send`.
///
/// The target node reads its payload back from
/// `extra["__send_inputs__"][<encoded target NodeKind>]`, where the barrier
/// appends every `Send` addressed to it during the step that dispatched it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Send {
    pub node: NodeKind,
    pub input: serde_json::Value,
}

impl Send {
    #[must_use]
    pub fn new(node: NodeKind, input: serde_json::Value) -> Self {
        Self { node, input }
    }
}

/// Route identifier used by frontier commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRoute {
    /// Route to another node in the graph.
    Node(NodeKind),
    /// Route to another node, carrying a payload that bypasses the static
    /// edge table entirely.
    Send(Send),
}

impl NodeRoute {
    /// Return the concrete `NodeKind` for this route.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        match self {
            NodeRoute::Node(kind) => kind,
            NodeRoute::Send(send) => &send.node,
        }
    }

    /// Clone the underlying `NodeKind`.
    #[must_use]
    pub fn to_node_kind(&self) -> NodeKind {
        self.kind().clone()
    }

    /// The payload carried by a `Send` route, if this is one.
    #[must_use]
    pub fn send_input(&self) -> Option<&serde_json::Value> {
        match self {
            NodeRoute::Node(_) => None,
            NodeRoute::Send(send) => Some(&send.input),
        }
    }
}

impl From<NodeKind> for NodeRoute {
    fn from(kind: NodeKind) -> Self {
        NodeRoute::Node(kind)
    }
}

impl From<Send> for NodeRoute {
    fn from(send: Send) -> Self {
        NodeRoute::Send(send)
    }
}

/// Command emitted by a node to manipulate the next frontier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrontierCommand {
    /// Append additional routes to the existing frontier calculation.
    Append(Vec<NodeRoute>),
    /// Replace the default routes emitted for the node.
    Replace(Vec<NodeRoute>),
}

/// Whether a `Command`'s `goto` targets the current graph or, for a node
/// running inside a subgraph, its parent. Subgraph composition itself is
/// out of scope here; `Parent` is recorded but currently treated the same
/// as `Current` by `AppRunner`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GraphScope {
    #[default]
    Current,
    Parent,
}

/// High-level instruction a node returns to simultaneously update state,
/// redirect control flow, and/or resume a paused run. Mirrors LangGraph's
/// `Command`.
///
/// `update` is folded into the `extra` channel the same way `NodePartial`'s
/// own `extra` field is; `goto` becomes a frontier replace (see
/// [`NodePartial::with_command`]); `resume` is surfaced to the next
/// superstep via `extra["__resume__"]` by [`crate::runtimes::AppRunner::resume_session`].
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Command {
    pub update: Option<FxHashMap<String, serde_json::Value>>,
    pub goto: Option<Vec<NodeRoute>>,
    pub resume: Option<serde_json::Value>,
    pub graph_scope: Option<GraphScope>,
}

impl Command {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_update(mut self, update: FxHashMap<String, serde_json::Value>) -> Self {
        self.update = Some(update);
        self
    }

    #[must_use]
    pub fn with_goto<I>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = NodeRoute>,
    {
        self.goto = Some(routes.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_resume(mut self, value: serde_json::Value) -> Self {
        self.resume = Some(value);
        self
    }

    #[must_use]
    pub fn with_graph_scope(mut self, scope: GraphScope) -> Self {
        self.graph_scope = Some(scope);
        self
    }
}
