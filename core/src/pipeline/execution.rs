// flowline/src/pipeline/execution.rs

//! Contains the `Pipeline::run()` method: wires stages together with bounded
//! channels, starts one driver per stage, and waits for all of them.

use crate::core::abort::AbortSignal;
use crate::core::output::Output;
use crate::error::{FlowError, FlowResult};
use crate::pipeline::definition::Pipeline;
use crate::pipeline::driver::{drive, Input};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{event, instrument, span, Instrument, Level};

impl Pipeline {
  /// Executes every stage concurrently as a connected streaming graph.
  ///
  /// Returns `Ok(())` once every stage has finished normally, or the first
  /// error reported on the run's abort signal. In both cases every stage
  /// driver and worker has exited before this returns. Effects already
  /// committed by stages are not rolled back.
  #[instrument(
        name = "Pipeline::run",
        skip_all,
        fields(
            num_stages = self.stages.len(),
            channel_capacity = self.config.channel_capacity,
        ),
        err(Display)
    )]
  pub async fn run(&self) -> FlowResult<()> {
    if self.stages.is_empty() {
      return Err(FlowError::configuration("pipeline has no stages"));
    }
    if self.config.channel_capacity == 0 {
      return Err(FlowError::configuration("channel_capacity must be at least 1"));
    }

    event!(Level::DEBUG, "Pipeline run starting.");
    let abort = AbortSignal::new();
    let mut drivers = JoinSet::new();
    let mut upstream: Option<mpsc::Receiver<_>> = None;
    let last_idx = self.stages.len() - 1;

    for (stage_idx, entry) in self.stages.iter().enumerate() {
      let input = match upstream.take() {
        Some(receiver) => Input::Channel(receiver),
        None => Input::start(),
      };

      let output = if stage_idx == last_idx {
        Output::terminal(abort.clone())
      } else {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity);
        upstream = Some(receiver);
        Output::channel(sender, abort.clone())
      };

      let stage_span = span!(
        Level::INFO,
        "stage_driver",
        stage_name = entry.stage.name(),
        stage_index = stage_idx,
        kind = ?entry.kind,
        pool_size = entry.kind.pool_size(),
      );
      drivers.spawn(drive(entry.stage.clone(), entry.kind, input, output, abort.clone()).instrument(stage_span));
    }

    while let Some(joined) = drivers.join_next().await {
      if let Err(e) = joined {
        abort.kill(FlowError::Internal(format!("stage driver failed: {}", e)));
      }
    }

    match abort.take_error() {
      Some(err) => {
        event!(Level::DEBUG, error = %err, "Pipeline run aborted.");
        Err(err)
      }
      None => {
        event!(Level::DEBUG, "Pipeline run completed successfully.");
        Ok(())
      }
    }
  }
}
