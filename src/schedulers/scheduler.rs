use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::event_bus::EventEmitter;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

use super::retry::RetryPolicy;
use super::SchedulerError;

/// Per-node bookkeeping of the last channel versions a node has observed,
/// keyed by `NodeKind::encode()`. Lets a superstep skip nodes that have
/// already processed the current state (no new messages/extra/errors since
/// their last run), mirroring the "versions_seen" gate of bulk-synchronous
/// execution.
#[derive(Clone, Debug, Default)]
pub struct SchedulerState {
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
}

impl SchedulerState {
    fn seen_versions(&self, node: &str) -> Option<&FxHashMap<String, u64>> {
        self.versions_seen.get(node)
    }

    fn record(&mut self, node: &str, messages: u64, extra: u64, errors: u64) {
        let entry = self.versions_seen.entry(node.to_string()).or_default();
        entry.insert("messages".to_string(), messages);
        entry.insert("extra".to_string(), extra);
        entry.insert("errors".to_string(), errors);
    }

    fn is_stale(&self, node: &str, messages: u64, extra: u64, errors: u64) -> bool {
        match self.seen_versions(node) {
            None => false,
            Some(seen) => {
                let seen_msgs = seen.get("messages").copied().unwrap_or(0);
                let seen_extra = seen.get("extra").copied().unwrap_or(0);
                let seen_errors = seen.get("errors").copied().unwrap_or(0);
                seen_msgs >= messages && seen_extra >= extra && seen_errors >= errors
            }
        }
    }
}

/// Outcome of running one superstep across the active frontier.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStepResult {
    pub outputs: Vec<(NodeKind, NodePartial)>,
    pub ran_nodes: Vec<NodeKind>,
    pub skipped_nodes: Vec<NodeKind>,
}

/// Runs the nodes of a single superstep concurrently, bounded by a
/// configurable fan-out limit, retrying transient node failures.
#[derive(Clone, Debug)]
pub struct Scheduler {
    pub concurrency_limit: usize,
    pub retry_policy: RetryPolicy,
}

impl Scheduler {
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            retry_policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Execute every node in `frontier` against the given snapshot, skipping
    /// any node whose recorded `versions_seen` already covers the snapshot's
    /// channel versions.
    #[instrument(skip(self, scheduler_state, nodes, snapshot, emitter), fields(step))]
    pub async fn superstep(
        &mut self,
        scheduler_state: &mut SchedulerState,
        nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
        frontier: Vec<NodeKind>,
        snapshot: StateSnapshot,
        step: u64,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<SchedulerStepResult, SchedulerError> {
        let messages_version = u64::from(snapshot.messages_version);
        let extra_version = u64::from(snapshot.extra_version);
        let errors_version = u64::from(snapshot.errors_version);

        let mut to_run: Vec<NodeKind> = Vec::new();
        let mut skipped: Vec<NodeKind> = Vec::new();

        for kind in frontier {
            if kind == NodeKind::Start || kind == NodeKind::End {
                skipped.push(kind);
                continue;
            }
            let key = kind.encode();
            if scheduler_state.is_stale(&key, messages_version, extra_version, errors_version) {
                skipped.push(kind);
                continue;
            }
            to_run.push(kind);
        }

        let mut join_set: JoinSet<(NodeKind, Result<NodePartial, NodeError>)> = JoinSet::new();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency_limit));

        for kind in &to_run {
            let Some(node) = nodes.get(kind) else {
                continue;
            };
            let node = Arc::clone(node);
            let kind = kind.clone();
            let snapshot = snapshot.clone();
            let emitter = Arc::clone(&emitter);
            let permit = Arc::clone(&semaphore);
            let retry_policy = self.retry_policy;
            let node_id = kind.encode();

            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await;
                let mut attempt = 0u32;
                loop {
                    let ctx = NodeContext {
                        node_id: node_id.clone(),
                        step,
                        event_emitter: Arc::clone(&emitter),
                    };
                    match node.run(snapshot.clone(), ctx).await {
                        Ok(partial) => break (kind, Ok(partial)),
                        Err(err) if RetryPolicy::is_retryable(&err) && attempt < retry_policy.max_retries as u32 => {
                            tokio::time::sleep(retry_policy.delay_for(attempt)).await;
                            attempt += 1;
                        }
                        Err(err) => break (kind, Err(err)),
                    }
                }
            });
        }

        let mut outputs: Vec<(NodeKind, NodePartial)> = Vec::new();
        let mut ran_nodes: Vec<NodeKind> = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            let (kind, result) = joined.map_err(SchedulerError::Join)?;
            match result {
                Ok(partial) => {
                    let key = kind.encode();
                    scheduler_state.record(&key, messages_version, extra_version, errors_version);
                    ran_nodes.push(kind.clone());
                    outputs.push((kind, partial));
                }
                Err(source) if source.is_interrupt() => {
                    // Cooperative suspension: surface as a fatal scheduler
                    // error so the runner can checkpoint and pause instead
                    // of silently dropping the node's partial progress.
                    return Err(SchedulerError::NodeRun { kind, step, source });
                }
                Err(source) => {
                    return Err(SchedulerError::NodeRun { kind, step, source });
                }
            }
        }

        // Preserve frontier order in ran_nodes/outputs for deterministic barriers.
        ran_nodes.sort_by_key(|k| to_run.iter().position(|r| r == k).unwrap_or(usize::MAX));
        outputs.sort_by_key(|(k, _)| to_run.iter().position(|r| r == k).unwrap_or(usize::MAX));

        Ok(SchedulerStepResult {
            outputs,
            ran_nodes,
            skipped_nodes: skipped,
        })
    }
}
