//! Small, independent helpers shared across the crate.
//!
//! Nothing in here depends on `state`, `app`, or `runtimes` - these are leaf
//! utilities so that higher-level modules can depend on them freely.

pub mod collections;
pub mod id_generator;
pub mod json_ext;
pub mod merge_inspector;
pub mod message_id_helpers;
pub mod type_guards;

pub use collections::{extra_map_from, new_extra_map};
pub use id_generator::IdGenerator;
