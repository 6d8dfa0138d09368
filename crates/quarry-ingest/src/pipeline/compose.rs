//! Sequencing nodes into pipelines.

use super::context::RunContext;
use super::node::{Flow, Node};
use crate::Result;
use quarry_core::Record;

/// What a nested pipeline emits to its outer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineOutput {
    /// Re-emit the input record once the nested run is over, however it ended.
    #[default]
    Input,
    /// Emit every record that reached the end of the nested pipeline.
    Outputs,
}

/// Whether to keep feeding records after a sink call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Summary of a top-level run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Records that made it through the last stage.
    pub records_out: usize,
    /// A node asked the pipeline to stop.
    pub stopped_early: bool,
}

/// An ordered sequence of nodes.
///
/// Records are pulled depth-first: each record produced by a stage is pushed
/// through all remaining stages before the stage is asked for its next
/// record, so no stage's output is ever buffered in full.
///
/// A `Pipeline` is itself a [`Node`]; nesting one inside another scopes
/// [`Flow::Stop`] to the nested part.
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn Node>>,
    output: PipelineOutput,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            output: PipelineOutput::default(),
        }
    }

    /// Append a stage.
    pub fn then<N: Node + 'static>(mut self, node: N) -> Self {
        self.stages.push(Box::new(node));
        self
    }

    /// Append an already boxed stage.
    pub fn then_boxed(mut self, node: Box<dyn Node>) -> Self {
        self.stages.push(node);
        self
    }

    /// Append several boxed stages.
    pub fn extend(mut self, nodes: impl IntoIterator<Item = Box<dyn Node>>) -> Self {
        self.stages.extend(nodes);
        self
    }

    pub fn with_output(mut self, output: PipelineOutput) -> Self {
        self.output = output;
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run from an empty seed record, discarding outputs.
    pub fn run(&self, ctx: &RunContext) -> Result<RunStats> {
        self.run_with(ctx, Record::new(), |_| Ok(Control::Continue))
    }

    /// Run from `seed`, handing every output record to `sink`.
    pub fn run_with<F>(&self, ctx: &RunContext, seed: Record, mut sink: F) -> Result<RunStats>
    where
        F: FnMut(Record) -> Result<Control>,
    {
        tracing::debug!(pipeline = %self.name, stages = self.stages.len(), "Running pipeline");
        let mut stats = RunStats::default();
        let control = self.drive(ctx, 0, seed, &mut |record| {
            stats.records_out += 1;
            sink(record)
        })?;
        stats.stopped_early = control == Control::Stop;
        Ok(stats)
    }

    /// Run and collect all outputs.
    pub fn collect(&self, ctx: &RunContext, seed: Record) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        self.run_with(ctx, seed, |record| {
            out.push(record);
            Ok(Control::Continue)
        })?;
        Ok(out)
    }

    fn drive(
        &self,
        ctx: &RunContext,
        index: usize,
        record: Record,
        sink: &mut dyn FnMut(Record) -> Result<Control>,
    ) -> Result<Control> {
        let Some(stage) = self.stages.get(index) else {
            return sink(record);
        };

        match stage.process(ctx, record)? {
            Flow::Stop => {
                tracing::debug!(pipeline = %self.name, node = stage.name(), "Stop requested");
                Ok(Control::Stop)
            }
            Flow::Records(stream) => {
                for item in stream {
                    if self.drive(ctx, index + 1, item?, sink)? == Control::Stop {
                        return Ok(Control::Stop);
                    }
                }
                Ok(Control::Continue)
            }
        }
    }
}

impl Node for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        match self.output {
            PipelineOutput::Input => {
                let stats = self.run_with(ctx, record.clone(), |_| Ok(Control::Continue))?;
                if stats.stopped_early {
                    tracing::debug!(pipeline = %self.name, "Nested pipeline stopped early");
                }
                Ok(Flow::one(record))
            }
            PipelineOutput::Outputs => Ok(Flow::from_vec(self.collect(ctx, record)?)),
        }
    }
}
