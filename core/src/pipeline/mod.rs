// flowline/src/pipeline/mod.rs

//! Defines the `Pipeline` struct, its construction, and the orchestration of a run.

pub mod definition;
pub mod execution;
pub(crate) mod driver;
pub(crate) mod reorder;

// Re-export the main Pipeline struct
pub use definition::Pipeline;
