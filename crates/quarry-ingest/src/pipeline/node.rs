//! The node abstraction: a lazy record-stream transformation.

use super::context::RunContext;
use crate::Result;
use quarry_core::Record;

/// Lazily produced records. Errors surface at the point the failing record
/// would have been pulled.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// What a node produces for one input record.
pub enum Flow<'a> {
    /// Zero or more output records, pulled one at a time.
    Records(RecordStream<'a>),
    /// Stop the enclosing pipeline. A nested pipeline absorbs this and lets
    /// the outer pipeline continue; at top level it ends the run.
    Stop,
}

impl<'a> Flow<'a> {
    /// Emit exactly one record.
    pub fn one(record: Record) -> Self {
        Self::Records(Box::new(std::iter::once(Ok(record))))
    }

    /// Emit nothing but keep the pipeline going.
    pub fn none() -> Self {
        Self::Records(Box::new(std::iter::empty()))
    }

    /// Emit the records of an already collected batch.
    pub fn from_vec(records: Vec<Record>) -> Self {
        Self::Records(Box::new(records.into_iter().map(Ok)))
    }

    /// Emit the items of a lazy iterator.
    pub fn stream<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Record>> + 'a,
    {
        Self::Records(Box::new(iter))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// A pipeline stage.
///
/// Nodes are built once per pipeline assembly. State that must persist for the
/// duration of a run (seen sets) lives in the [`RunContext`], not in the node.
pub trait Node {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Transform one input record.
    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>>;
}

impl<N: Node + ?Sized> Node for Box<N> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        (**self).process(ctx, record)
    }
}

/// A node backed by a closure returning a batch of records.
pub struct FnNode<F> {
    name: String,
    f: F,
}

impl<F> Node for FnNode<F>
where
    F: Fn(&RunContext, Record) -> Result<Vec<Record>>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        Ok(Flow::from_vec((self.f)(ctx, record)?))
    }
}

/// Wrap a closure as a node.
pub fn node_fn<F>(name: impl Into<String>, f: F) -> FnNode<F>
where
    F: Fn(&RunContext, Record) -> Result<Vec<Record>>,
{
    FnNode {
        name: name.into(),
        f,
    }
}
