//! Generation of run/session/checkpoint identifiers.
//!
//! Centralized so that the format (a UUID v4, optionally prefixed) can change
//! in one place without chasing call sites across the runtime layer.

use uuid::Uuid;

/// Generates string identifiers for runs, sessions, and checkpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates a fresh run id, e.g. `run-3fa85f64-5717-4562-b3fc-2c963f66afa6`.
    #[must_use]
    pub fn generate_run_id(&self) -> String {
        format!("run-{}", Uuid::new_v4())
    }

    /// Generates a fresh thread/session id.
    #[must_use]
    pub fn generate_thread_id(&self) -> String {
        format!("thread-{}", Uuid::new_v4())
    }

    /// Generates a fresh checkpoint id. Checkpoint ids are opaque strings;
    /// ordering within a thread is established by the checkpointer's own
    /// sequencing, not by sorting this id.
    #[must_use]
    pub fn generate_checkpoint_id(&self) -> String {
        format!("ckpt-{}", Uuid::new_v4())
    }

    /// Generates a fresh task id, used to key `put_writes` records.
    #[must_use]
    pub fn generate_task_id(&self) -> String {
        format!("task-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let gen = IdGenerator::new();
        let a = gen.generate_run_id();
        let b = gen.generate_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }
}
