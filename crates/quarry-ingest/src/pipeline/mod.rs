//! Pipeline execution engine.
//!
//! A [`Pipeline`] is an ordered list of [`Node`]s. Each node turns one input
//! [`Record`](quarry_core::Record) into a lazy stream of output records, or asks
//! the enclosing pipeline to [`Stop`](Flow::Stop). Pipelines nest; a nested
//! pipeline contains a stop so that the steps after it still run.
//!
//! Per-run state (de-duplication sets) lives in a [`RunContext`] passed to
//! every node.

mod compose;
mod context;
mod node;

pub use compose::{Control, Pipeline, PipelineOutput, RunStats};
pub use context::{RunContext, Scope};
pub use node::{Flow, FnNode, Node, RecordStream, node_fn};
