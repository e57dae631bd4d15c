// flowline/src/core/mod.rs

//! Record, stage and signalling primitives shared by every pipeline run.

pub mod abort;
pub mod envelope;
pub mod output;
pub mod stage;

// Re-export key types for easier access from other flowline modules (and lib.rs)
pub use abort::AbortSignal;
pub use envelope::Envelope;
pub use output::Output;
pub use stage::{Stage, StageKind};
