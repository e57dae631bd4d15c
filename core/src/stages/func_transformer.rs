// flowline/src/stages/func_transformer.rs

use crate::core::{AbortSignal, Envelope, Output, Stage};
use crate::error::FlowResult;
use async_trait::async_trait;
use std::sync::Arc;

type TransformFn = Arc<dyn Fn(Envelope) -> FlowResult<Envelope> + Send + Sync + 'static>;

/// Applies a function to every record and sends the result downstream.
///
/// Handy for small reshaping steps; anything stateful or multi-output is better
/// written as its own `Stage`. A function error aborts the run.
pub struct FuncTransformer {
  transform: TransformFn,
  name: String,
  concurrency: usize,
}

impl FuncTransformer {
  pub fn new(transform: impl Fn(Envelope) -> FlowResult<Envelope> + Send + Sync + 'static) -> Self {
    Self {
      transform: Arc::new(transform),
      name: "FuncTransformer".to_string(),
      concurrency: 1,
    }
  }

  /// Name shown in logs instead of "FuncTransformer".
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Runs up to `concurrency` transforms at once. Output order is unaffected.
  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }
}

#[async_trait]
impl Stage for FuncTransformer {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    if let Some(transformed) = abort.kill_if_err((self.transform)(record)) {
      abort.kill_if_err(output.send(transformed).await);
    }
  }

  fn concurrency(&self) -> usize {
    self.concurrency
  }

  fn name(&self) -> &str {
    &self.name
  }
}
