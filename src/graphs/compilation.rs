//! Graph compilation logic and validation.
//!
//! This module contains the logic for compiling a GraphBuilder into an
//! executable App, including structural validation.

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::app::App;
use crate::types::NodeKind;

/// Errors that can occur while compiling a [`GraphBuilder`](super::GraphBuilder)
/// into an executable [`App`].
#[derive(Debug, Error, Diagnostic)]
pub enum GraphCompileError {
    /// The graph has no edges at all, so there is nothing to execute from
    /// `Start`.
    #[error("graph has no edges; add at least one edge from NodeKind::Start")]
    #[diagnostic(
        code(weavegraph::graphs::no_entry),
        help("Call add_edge(NodeKind::Start, ...) to define an entry point.")
    )]
    NoEntryEdges,

    /// An edge references a custom node that was never registered with
    /// `add_node`.
    #[error("edge references unregistered node: {node}")]
    #[diagnostic(
        code(weavegraph::graphs::undefined_node),
        help("Register {node} with GraphBuilder::add_node before wiring edges to it.")
    )]
    UndefinedNode { node: String },

    /// A conditional edge's `from` node was never registered (and is not a
    /// virtual endpoint).
    #[error("conditional edge originates from unregistered node: {node}")]
    #[diagnostic(code(weavegraph::graphs::undefined_conditional_source))]
    UndefinedConditionalSource { node: String },

    /// The graph's unconditional edges contain a cycle among custom nodes.
    #[error("graph contains a cycle involving: {}", nodes.join(", "))]
    #[diagnostic(
        code(weavegraph::graphs::cyclic),
        help("Cyclic routing must be expressed through conditional edges / Command.goto, not static edges.")
    )]
    Cyclic { nodes: Vec<String> },
}

/// Compilation logic for GraphBuilder.
impl super::builder::GraphBuilder {
    /// Compiles the graph into an executable application.
    ///
    /// Validates the graph configuration and converts it into an [`App`] that
    /// can execute workflows. Validation performed:
    ///
    /// - At least one edge must exist (an entry point from `Start`).
    /// - Every unconditional edge must target either a virtual endpoint
    ///   (`Start`/`End`) or a node registered via `add_node`.
    /// - Every conditional edge's source node must be registered (or a
    ///   virtual endpoint).
    /// - The static (unconditional) edge set must be acyclic; dynamic
    ///   cycles are only reachable through conditional routing or
    ///   `Command.goto`, never through the static topology.
    ///
    /// # Errors
    ///
    /// Returns [`GraphCompileError`] if any of the checks above fail.
    ///
    /// # Examples
    ///
    /// ```
    /// use weavegraph::graphs::GraphBuilder;
    /// use weavegraph::types::NodeKind;
    ///
    /// # struct MyNode;
    /// # #[async_trait::async_trait]
    /// # impl weavegraph::node::Node for MyNode {
    /// #     async fn run(&self, _: weavegraph::state::StateSnapshot, _: weavegraph::node::NodeContext) -> Result<weavegraph::node::NodePartial, weavegraph::node::NodeError> {
    /// #         Ok(weavegraph::node::NodePartial::default())
    /// #     }
    /// # }
    ///
    /// let app = GraphBuilder::new()
    ///     .add_node(NodeKind::Custom("process".into()), MyNode)
    ///     .add_edge(NodeKind::Start, NodeKind::Custom("process".into()))
    ///     .add_edge(NodeKind::Custom("process".into()), NodeKind::End)
    ///     .compile()
    ///     .unwrap();
    ///
    /// // App is ready for execution
    /// let _ = app;
    /// ```
    pub fn compile(self) -> Result<App, GraphCompileError> {
        validate(&self)?;
        let (nodes, edges, conditional_edges, runtime_config, reducer_registry, channel_registry) =
            self.into_parts();
        Ok(App::from_parts_with_reducers(
            nodes,
            edges,
            conditional_edges,
            runtime_config,
            reducer_registry,
        )
        .with_channel_registry(channel_registry))
    }
}

fn validate(builder: &super::builder::GraphBuilder) -> Result<(), GraphCompileError> {
    let edges = builder.edges_ref();
    let nodes = builder.nodes_ref();
    let conditional_edges = builder.conditional_edges_ref();

    if edges.is_empty() && conditional_edges.is_empty() {
        return Err(GraphCompileError::NoEntryEdges);
    }

    let is_registered = |kind: &NodeKind| -> bool {
        matches!(kind, NodeKind::Start | NodeKind::End) || nodes.contains_key(kind)
    };

    for (from, targets) in edges {
        if !is_registered(from) {
            return Err(GraphCompileError::UndefinedNode {
                node: from.encode(),
            });
        }
        for to in targets {
            if !is_registered(to) {
                return Err(GraphCompileError::UndefinedNode { node: to.encode() });
            }
        }
    }

    for ce in conditional_edges {
        if !is_registered(ce.from()) {
            return Err(GraphCompileError::UndefinedConditionalSource {
                node: ce.from().encode(),
            });
        }
    }

    if let Some(cycle) = find_cycle(edges) {
        return Err(GraphCompileError::Cyclic {
            nodes: cycle.iter().map(NodeKind::encode).collect(),
        });
    }

    Ok(())
}

/// Returns the set of nodes left out of a topological sort, i.e. the nodes
/// involved in a cycle. Empty if the edge set is acyclic.
fn find_cycle(
    edges: &rustc_hash::FxHashMap<NodeKind, Vec<NodeKind>>,
) -> Option<Vec<NodeKind>> {
    let sorted = super::iteration::topological_sort(edges);
    let sorted_set: FxHashSet<&NodeKind> = sorted.iter().collect();

    let mut all_nodes: FxHashSet<NodeKind> = FxHashSet::default();
    for (from, targets) in edges {
        all_nodes.insert(from.clone());
        for to in targets {
            all_nodes.insert(to.clone());
        }
    }

    let mut remaining: Vec<NodeKind> = all_nodes
        .into_iter()
        .filter(|n| !sorted_set.contains(n))
        .collect();
    if remaining.is_empty() {
        None
    } else {
        remaining.sort_by_key(NodeKind::encode);
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeContext, NodeError, NodePartial};
    use crate::state::StateSnapshot;
    use async_trait::async_trait;

    struct NoopNode;
    #[async_trait]
    impl Node for NoopNode {
        async fn run(
            &self,
            _snapshot: StateSnapshot,
            _ctx: NodeContext,
        ) -> Result<NodePartial, NodeError> {
            Ok(NodePartial::default())
        }
    }

    #[test]
    fn empty_graph_fails_to_compile() {
        let err = super::super::builder::GraphBuilder::new().compile().err();
        assert!(matches!(err, Some(GraphCompileError::NoEntryEdges)));
    }

    #[test]
    fn undefined_edge_target_is_rejected() {
        let builder = super::super::builder::GraphBuilder::new()
            .add_edge(NodeKind::Start, NodeKind::Custom("ghost".into()));
        let err = builder.compile().err();
        assert!(matches!(err, Some(GraphCompileError::UndefinedNode { .. })));
    }

    #[test]
    fn cyclic_static_edges_are_rejected() {
        let builder = super::super::builder::GraphBuilder::new()
            .add_node(NodeKind::Custom("A".into()), NoopNode)
            .add_node(NodeKind::Custom("B".into()), NoopNode)
            .add_edge(NodeKind::Start, NodeKind::Custom("A".into()))
            .add_edge(NodeKind::Custom("A".into()), NodeKind::Custom("B".into()))
            .add_edge(NodeKind::Custom("B".into()), NodeKind::Custom("A".into()));
        let err = builder.compile().err();
        assert!(matches!(err, Some(GraphCompileError::Cyclic { .. })));
    }

    #[test]
    fn linear_graph_compiles() {
        let app = super::super::builder::GraphBuilder::new()
            .add_node(NodeKind::Custom("A".into()), NoopNode)
            .add_edge(NodeKind::Start, NodeKind::Custom("A".into()))
            .add_edge(NodeKind::Custom("A".into()), NodeKind::End)
            .compile()
            .unwrap();
        assert_eq!(app.nodes().len(), 1);
    }
}
