use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodeError;
use crate::types::NodeKind;

/// Errors raised while running one superstep.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    /// A node returned a fatal error (anything other than
    /// [`NodeError::GraphInterrupt`]) after exhausting its retry budget.
    #[error("node {kind} failed at step {step}: {source}")]
    #[diagnostic(code(weavegraph::schedulers::node_run))]
    NodeRun {
        kind: NodeKind,
        step: u64,
        #[source]
        source: NodeError,
    },

    /// The tokio task running a node panicked or was cancelled.
    #[error("scheduler task join error: {0}")]
    #[diagnostic(code(weavegraph::schedulers::join))]
    Join(#[from] tokio::task::JoinError),
}
