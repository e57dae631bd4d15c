// flowline/src/lib.rs

//! Flowline: an ASYNC streaming ETL pipeline engine for Rust.
//!
//! A pipeline is a linear chain of stages connected by bounded channels. Every
//! stage runs as its own task, so records stream through the whole chain with
//! backpressure instead of moving in lockstep. Features:
//!  - Records travel as opaque `Envelope`s holding JSON bytes.
//!  - Stages opt into a bounded worker pool while keeping output in input order.
//!  - A single run-wide abort signal: the first reported error halts every stage.
//!  - Built-in stages for closures and for reading from / writing to SQL databases.

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod relational;
pub mod stages;

// --- Re-exports for the Public API ---

// Types every stage implementation touches
pub use crate::core::{AbortSignal, Envelope, Output, Stage, StageKind};

pub use crate::pipeline::definition::Pipeline;

pub use crate::config::FlowConfig;
pub use crate::error::{FlowError, FlowResult};

pub use crate::stages::{FuncTransformer, SqlReader, SqlWriter};

/*
    Typical run:
    1. Implement `Stage` for each step (or use `FuncTransformer`, `SqlReader`, `SqlWriter`).
       The first stage receives a single start record and produces the stream.
    2. Override `concurrency()` on stages whose per-record work is I/O bound.
    3. Build a `Pipeline` with the stages in order, optionally `.with_config(FlowConfig::from_env()?)`.
    4. `pipeline.run().await` resolves once every stage is done, with the first
       error any stage reported.
*/
