//! Checkpointer infrastructure
//!
//! Defines the `Checkpointer` trait: an append-only log of per-session
//! execution steps (`put`/`get_tuple`/`list`), a pending-writes staging area
//! (`put_writes`) for writes produced before a barrier merges them, and a
//! version minter (`get_next_version`) so channel versions stay consistent
//! across restarts and (for durable backends) concurrent writers. `save` and
//! `load_latest` are default methods kept for call-site convenience, backed
//! by `put`/`get_tuple`.
//!
//! `InMemoryCheckpointer` is the non-durable reference implementation.
//! `SQLiteCheckpointer` and `PostgresCheckpointer` (see
//! `runtimes::checkpointer_sqlite`/`runtimes::checkpointer_postgres`) persist
//! the same history to disk.
//!

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::RwLock;

use crate::{
    runtimes::runner::SessionState, schedulers::SchedulerState, state::VersionedState,
    types::NodeKind,
};

/// A durable snapshot of session execution state at a barrier boundary.
///
/// This structure captures both the current state and execution history
/// to enable full session resumption and audit trails.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub session_id: String,
    pub step: u64,
    pub state: VersionedState,
    pub frontier: Vec<NodeKind>,
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>, // scheduler gating
    pub concurrency_limit: usize,
    pub created_at: DateTime<Utc>,
    /// Nodes that executed in this step (empty for step 0)
    pub ran_nodes: Vec<NodeKind>,
    /// Nodes that were skipped in this step (empty for step 0)
    pub skipped_nodes: Vec<NodeKind>,
    /// Channels that were updated in this step (empty for step 0)
    pub updated_channels: Vec<String>,
}

impl Checkpoint {
    /// Create a checkpoint from the current session state.
    ///
    /// This captures a snapshot of the session's execution state that can be
    /// persisted and later restored to resume execution from this point.
    ///
    /// # Parameters
    ///
    /// * `session_id` - Unique identifier for the session
    /// * `session` - Current session state to checkpoint
    ///
    /// # Returns
    ///
    /// A `Checkpoint` containing all necessary state for resumption
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use weavegraph::runtimes::{Checkpoint, SessionState};
    /// # fn example(session_state: SessionState) {
    /// let checkpoint = Checkpoint::from_session("my_session", &session_state);
    /// // checkpoint can now be saved via a Checkpointer
    /// # }
    /// ```
    #[must_use]
    pub fn from_session(session_id: &str, session: &SessionState) -> Self {
        Self {
            session_id: session_id.to_string(),
            step: session.step,
            state: session.state.clone(),
            frontier: session.frontier.clone(),
            versions_seen: session.scheduler_state.versions_seen.clone(),
            concurrency_limit: session.scheduler.concurrency_limit,
            created_at: Utc::now(),
            ran_nodes: vec![], // No execution history for raw session state
            skipped_nodes: vec![],
            updated_channels: vec![],
        }
    }

    /// Create a checkpoint from a completed step report.
    ///
    /// This captures the full execution context including what nodes ran,
    /// were skipped, and which channels were updated during the step.
    ///
    /// # Parameters
    ///
    /// * `session_id` - Unique identifier for the session
    /// * `session_state` - Current session state after step execution
    /// * `step_report` - Details of what happened during step execution
    ///
    /// # Returns
    ///
    /// A `Checkpoint` with complete step execution metadata
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use weavegraph::runtimes::{Checkpoint, SessionState, StepReport};
    /// # fn example(session_state: SessionState, step_report: StepReport) {
    /// let checkpoint = Checkpoint::from_step_report(
    ///     "my_session",
    ///     &session_state,
    ///     &step_report
    /// );
    /// # }
    /// ```
    #[must_use]
    pub fn from_step_report(
        session_id: &str,
        session_state: &SessionState,
        step_report: &crate::runtimes::runner::StepReport,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            step: session_state.step,
            state: session_state.state.clone(),
            frontier: session_state.frontier.clone(),
            versions_seen: session_state.scheduler_state.versions_seen.clone(),
            concurrency_limit: session_state.scheduler.concurrency_limit,
            created_at: Utc::now(),
            ran_nodes: step_report.ran_nodes.clone(),
            skipped_nodes: step_report.skipped_nodes.clone(),
            updated_channels: step_report
                .barrier_outcome
                .updated_channels
                .iter()
                .map(|s| (*s).to_string())
                .chain(
                    step_report
                        .barrier_outcome
                        .updated_custom_channels
                        .iter()
                        .cloned(),
                )
                .collect(),
        }
    }
}

/// A write staged against a channel ahead of a barrier commit.
///
/// `put_writes` lets a scheduler record the individual task outputs that make
/// up a step before they are merged, which is what makes time-travel fork
/// possible: a later run can replay from an earlier checkpoint while
/// inspecting (or discarding) writes staged after it without having to
/// reconstruct them from the merged state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub writer: String,
    pub value: serde_json::Value,
}

impl PendingWrite {
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        channel: impl Into<String>,
        writer: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            channel: channel.into(),
            writer: writer.into(),
            value,
        }
    }
}

/// Errors from checkpointer operations.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CheckpointerError {
    /// Session was not found in the checkpointer.
    #[error("session not found: {session_id}")]
    #[diagnostic(
        code(weavegraph::checkpointer::not_found),
        help("Ensure the session ID `{session_id}` is correct and the session has been created.")
    )]
    NotFound { session_id: String },

    /// Backend storage error (database, filesystem, etc.).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(weavegraph::checkpointer::backend),
        help("Check backend connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    /// Other checkpointer errors.
    #[error("checkpointer error: {message}")]
    #[diagnostic(code(weavegraph::checkpointer::other))]
    Other { message: String },
}

/// Selects the backing implementation of the `Checkpointer` trait.
///
/// Variants:
/// * `InMemory` – Volatile process‑local storage. Fast, non‑durable; suitable for
///   tests and ephemeral runs.
/// * `SQLite` – Durable, file (or memory) backed storage using `SQLiteCheckpointer`
///   (see `runtimes::checkpointer_sqlite`). Persists step history and the latest
///   snapshot for session resumption.
/// * `Postgres` – Durable, server-backed storage using `PostgresCheckpointer`
///   (see `runtimes::checkpointer_postgres`). Same step-history semantics as
///   `SQLite`, suited to multi-process deployments.
///
/// Note:
/// The runtime previously had an unreachable wildcard match when exhaustively
/// enumerating these variants. If additional variants are added in the future,
/// they should be explicitly matched (or a deliberate catch‑all retained).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointerType {
    /// In‑memory (non‑durable) checkpointing.
    InMemory,
    #[cfg(feature = "sqlite")]
    /// SQLite‑backed durable checkpointing (see `SQLiteCheckpointer`).
    SQLite,
    #[cfg(feature = "postgres")]
    /// Postgres‑backed durable checkpointing (see `PostgresCheckpointer`).
    Postgres,
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Trait for persistent storage and retrieval of workflow execution state.
///
/// Checkpointers provide durable storage for workflow execution state, enabling
/// session resumption across process restarts. Implementations must ensure that
/// checkpoints are atomic and consistent.
///
/// # Design Principles
///
/// - **Atomicity**: Checkpoint saves should be all-or-nothing operations
/// - **Consistency**: The stored state should always be in a valid, resumable state
/// - **Idempotency**: Saving the same checkpoint multiple times should be safe
/// - **Isolation**: Concurrent access to different sessions should not interfere
///
/// # Implementation Notes
///
/// - All operations should be idempotent where possible
/// - Concurrent access to the same session should be handled gracefully
/// - Backend errors should be mapped to appropriate `CheckpointerError` variants
/// - The `save` operation replaces any existing checkpoint for the session
/// - The `load_latest` operation returns `None` for non-existent sessions
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow usage across async tasks
/// and thread boundaries. Interior mutability should use appropriate synchronization
/// primitives (e.g., `RwLock`, `Mutex`).
///
/// # Error Handling
///
/// Methods should return specific `CheckpointerError` variants:
/// - `NotFound`: When a session doesn't exist (only for operations that require it)
/// - `Backend`: For storage-related errors (database, filesystem, network)
/// - `Other`: For serialization errors or other unexpected conditions
///
/// # Examples
///
/// ```rust,no_run
/// use weavegraph::runtimes::{Checkpointer, Checkpoint, InMemoryCheckpointer};
/// use weavegraph::state::VersionedState;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let checkpointer = InMemoryCheckpointer::new();
///
/// // Save a checkpoint
/// let state = VersionedState::new_with_user_message("Hello");
/// // ... create checkpoint from session state
/// # let checkpoint = todo!(); // placeholder
/// checkpointer.save(checkpoint).await?;
///
/// // Load the latest checkpoint
/// if let Some(checkpoint) = checkpointer.load_latest("session_id").await? {
///     // Resume execution from checkpoint
///     println!("Resuming from step {}", checkpoint.step);
/// }
///
/// // List all sessions
/// let sessions = checkpointer.list_sessions().await?;
/// println!("Found {} sessions", sessions.len());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint as a new step in the session's history.
    ///
    /// Unlike the legacy `save`, this must not discard prior steps: a
    /// `Checkpointer` is an append-only log of a session's execution, and
    /// `get_tuple`/`list` rely on every previously put checkpoint remaining
    /// retrievable. Putting a checkpoint for a `(session_id, step)` pair that
    /// already exists replaces only that step (idempotent re-put).
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error (database, filesystem, etc.)
    /// * `Other` - Serialization error or other unexpected condition
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Persist the latest checkpoint for a session.
    ///
    /// Default implementation: delegates to [`Self::put`]. Kept as a
    /// separate trait method (rather than removed) because it is the call
    /// site used throughout `runtimes::runner` and is a clearer name than
    /// `put` at a barrier boundary.
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error (database, filesystem, etc.)
    /// * `Other` - Serialization error or other unexpected condition
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.put(checkpoint).await
    }

    /// Fetch a single checkpoint: the one at `step`, or the latest if `step`
    /// is `None`.
    ///
    /// Returns `None` if no checkpoint exists for the given session (or the
    /// given session/step pair).
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error
    /// * `Other` - Deserialization error or corruption
    async fn get_tuple(&self, session_id: &str, step: Option<u64>) -> Result<Option<Checkpoint>>;

    /// Load the most recent checkpoint for a session.
    ///
    /// Default implementation: delegates to `get_tuple(session_id, None)`.
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error
    /// * `Other` - Deserialization error or corruption
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        self.get_tuple(session_id, None).await
    }

    /// List the full checkpoint history for a session, most recent step
    /// first.
    ///
    /// This is what makes time-travel fork possible: a caller can pick any
    /// past step from the returned history and resume execution from it.
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error
    /// * `Other` - Deserialization error or corruption
    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>>;

    /// Stage writes produced by individual tasks during `step`, ahead of the
    /// barrier that merges them into the next checkpoint.
    ///
    /// Implementations should accumulate writes for a given `(session_id,
    /// step)` across multiple calls rather than overwrite them, since tasks
    /// within one superstep call this independently.
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error
    async fn put_writes(&self, session_id: &str, step: u64, writes: Vec<PendingWrite>)
        -> Result<()>;

    /// Mint the next monotonic version number for `channel` within
    /// `session_id`.
    ///
    /// Centralizing version minting in the checkpointer (rather than in the
    /// in-process barrier merge) keeps version numbers consistent across
    /// process restarts and, for durable backends, across concurrent
    /// writers.
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error
    async fn get_next_version(&self, session_id: &str, channel: &str) -> Result<u64>;

    /// List all session IDs known to this checkpointer.
    ///
    /// Returns a vector of session IDs that have at least one checkpoint
    /// stored. The order is implementation-defined but should be consistent.
    ///
    /// # Errors
    ///
    /// * `Backend` - Storage backend error
    async fn list_sessions(&self) -> Result<Vec<String>>;
}

/// In‑memory checkpointer. Stores the full append-only step history per
/// session, plus pending writes and channel version counters, all behind
/// process-local locks. Non-durable; suitable for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    /// Step history per session, kept in ascending `step` order.
    history: RwLock<FxHashMap<String, Vec<Checkpoint>>>,
    pending_writes: RwLock<FxHashMap<(String, u64), Vec<PendingWrite>>>,
    versions: RwLock<FxHashMap<(String, String), u64>>,
}

impl InMemoryCheckpointer {
    /// Create a new in-memory checkpointer.
    ///
    /// # Returns
    ///
    /// A new `InMemoryCheckpointer` instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: RwLock::new(FxHashMap::default()),
            pending_writes: RwLock::new(FxHashMap::default()),
            versions: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut map = self
            .history
            .write()
            .map_err(|e| CheckpointerError::Backend {
                message: format!("lock poisoned: {e}"),
            })?;
        let steps = map.entry(checkpoint.session_id.clone()).or_default();
        match steps.iter_mut().find(|c| c.step == checkpoint.step) {
            Some(existing) => *existing = checkpoint,
            None => {
                steps.push(checkpoint);
                steps.sort_by_key(|c| c.step);
            }
        }
        Ok(())
    }

    async fn get_tuple(&self, session_id: &str, step: Option<u64>) -> Result<Option<Checkpoint>> {
        let map = self.history.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        let Some(steps) = map.get(session_id) else {
            return Ok(None);
        };
        Ok(match step {
            Some(s) => steps.iter().find(|c| c.step == s).cloned(),
            None => steps.last().cloned(),
        })
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let map = self.history.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        let mut steps = map.get(session_id).cloned().unwrap_or_default();
        steps.reverse(); // most recent first
        Ok(steps)
    }

    async fn put_writes(
        &self,
        session_id: &str,
        step: u64,
        writes: Vec<PendingWrite>,
    ) -> Result<()> {
        let mut map = self
            .pending_writes
            .write()
            .map_err(|e| CheckpointerError::Backend {
                message: format!("lock poisoned: {e}"),
            })?;
        map.entry((session_id.to_string(), step))
            .or_default()
            .extend(writes);
        Ok(())
    }

    async fn get_next_version(&self, session_id: &str, channel: &str) -> Result<u64> {
        let mut map = self.versions.write().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        let entry = map
            .entry((session_id.to_string(), channel.to_string()))
            .or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let map = self.history.read().map_err(|e| CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map.keys().cloned().collect())
    }
}

/// Restore a `SessionState` from a persisted `Checkpoint`.
///
/// This utility function reconstructs the in-memory session state from a
/// checkpoint, allowing execution to resume from the checkpointed step.
/// The restored state maintains all version information and scheduler state
/// for seamless continuation.
///
/// # Parameters
///
/// * `cp` - The checkpoint to restore from
///
/// # Returns
///
/// A `SessionState` ready for continued execution with:
/// - Restored versioned state channels (messages, extra)
/// - Correct step counter and frontier nodes
/// - Reconstructed scheduler with original concurrency limits
/// - Preserved version tracking for proper barrier coordination
///
/// # Examples
///
/// ```rust,no_run
/// # use weavegraph::runtimes::{restore_session_state, Checkpoint};
/// # async fn example(checkpoint: Checkpoint) {
/// let session_state = restore_session_state(&checkpoint);
/// // session_state can now be used to continue execution
/// assert_eq!(session_state.step, checkpoint.step);
/// assert_eq!(session_state.frontier, checkpoint.frontier);
/// # }
/// ```
#[must_use = "restored session state should be used to continue execution"]
pub fn restore_session_state(cp: &Checkpoint) -> SessionState {
    use crate::schedulers::Scheduler;
    SessionState {
        state: cp.state.clone(),
        step: cp.step,
        frontier: cp.frontier.clone(),
        scheduler: Scheduler::new(cp.concurrency_limit),
        scheduler_state: SchedulerState {
            versions_seen: cp.versions_seen.clone(),
        },
    }
}
