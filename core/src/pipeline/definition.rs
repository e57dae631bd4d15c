// flowline/src/pipeline/definition.rs

//! Contains the `Pipeline` struct definition and methods for its construction.

use crate::config::FlowConfig;
use crate::core::stage::{Stage, StageKind};
use std::sync::Arc;

/// A registered stage together with the scheduling decided for it at registration.
#[derive(Clone)]
pub(crate) struct StageEntry {
  pub(crate) stage: Arc<dyn Stage>,
  pub(crate) kind: StageKind,
}

impl std::fmt::Debug for StageEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageEntry")
      .field("name", &self.stage.name())
      .field("kind", &self.kind)
      .finish()
  }
}

/// An ordered, linear sequence of stages connected by bounded channels.
///
/// Stage N's output channel is stage N+1's input; the last stage has no output.
/// A pipeline holds no per-run state, but the stage instances it holds may:
/// running the same pipeline twice reuses those instances.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
  pub(crate) stages: Vec<StageEntry>,
  pub(crate) config: FlowConfig,
}

impl Pipeline {
  /// Creates a pipeline from stages in execution order, using the default config.
  pub fn new<I>(stages: I) -> Self
  where
    I: IntoIterator<Item = Arc<dyn Stage>>,
  {
    let mut pipeline = Self::default();
    for stage in stages {
      pipeline.push_entry(stage);
    }
    pipeline
  }

  /// Appends a stage to the end of the pipeline.
  pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
    self.push_entry(Arc::new(stage));
    self
  }

  /// Appends an already shared stage to the end of the pipeline.
  pub fn add_shared_stage(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
    self.push_entry(stage);
    self
  }

  pub fn with_config(mut self, config: FlowConfig) -> Self {
    self.config = config;
    self
  }

  pub fn config(&self) -> &FlowConfig {
    &self.config
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  /// Stage names in execution order.
  pub fn stage_names(&self) -> Vec<String> {
    self.stages.iter().map(|entry| entry.stage.name().to_string()).collect()
  }

  /// Scheduling of each stage in execution order.
  pub fn stage_kinds(&self) -> Vec<StageKind> {
    self.stages.iter().map(|entry| entry.kind).collect()
  }

  fn push_entry(&mut self, stage: Arc<dyn Stage>) {
    // The capability probe happens once here, never per call.
    let kind = StageKind::probe(stage.as_ref());
    self.stages.push(StageEntry { stage, kind });
  }
}
