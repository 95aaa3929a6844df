//! Pipeline execution: sequential wiring, concurrent stages, terminal drain.

use super::adapter::{AnyStream, ErasedStage, RunScope, StageTask, TypeDescriptor};
use super::{ErrorPolicy, PipelineConfig};
use crate::cancellation::CancellationToken;
use crate::core::{ExecutionSummary, ResultEnvelope, StageOutcome, StageState};
use crate::errors::{PipelineError, StageError};
use chrono::Utc;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// An executable, immutable pipeline producing `Out` items.
///
/// Every call to [`execute`](Self::execute) allocates fresh streams and
/// spawns fresh stage tasks, so a pipeline can be run any number of times.
pub struct Pipeline<C, Out> {
    name: String,
    config: PipelineConfig,
    stages: Arc<[Arc<dyn ErasedStage<C>>]>,
    _output: PhantomData<fn() -> Out>,
}

impl<C, Out> Clone for Pipeline<C, Out> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            stages: Arc::clone(&self.stages),
            _output: PhantomData,
        }
    }
}

impl<C, Out> std::fmt::Debug for Pipeline<C, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("config", &self.config)
            .finish()
    }
}

/// The final stream plus every launched task.
type Wired = (AnyStream, Vec<StageTask>);

/// What happened while joining one stage task.
enum Joined {
    Finished(Result<Result<(), StageError>, JoinError>),
    /// Still running when the grace period after cancellation ran out.
    Abandoned,
}

impl<C, Out> Pipeline<C, Out> {
    pub(crate) fn new(
        name: String,
        config: PipelineConfig,
        stages: Arc<[Arc<dyn ErasedStage<C>>]>,
    ) -> Self {
        Self {
            name,
            config,
            stages,
            _output: PhantomData,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the execution configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl<C, Out> Pipeline<C, Out>
where
    C: Send + Sync + 'static,
    Out: Send + 'static,
{
    /// Runs the pipeline and discards whatever reaches the end of the chain.
    ///
    /// Returns once the final stream is drained and every stage task has
    /// finished. Stages that ignore cancellation are aborted once
    /// `shutdown_grace` has passed after the signal fired.
    ///
    /// # Errors
    ///
    /// Wiring and final-type failures are always returned. Stage failures and
    /// cancellation are returned under [`ErrorPolicy::Surface`] and only
    /// recorded in the summary under [`ErrorPolicy::Swallow`].
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        ctx: &Arc<C>,
    ) -> Result<ExecutionSummary, PipelineError> {
        self.run(cancel, ctx, |_| {}).await
    }

    /// Runs the pipeline and returns every envelope that reaches the end.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn collect(
        &self,
        cancel: &CancellationToken,
        ctx: &Arc<C>,
    ) -> Result<Vec<ResultEnvelope<Out>>, PipelineError> {
        let mut items = Vec::new();
        self.run(cancel, ctx, |envelope| items.push(envelope)).await?;
        Ok(items)
    }

    async fn run<F>(
        &self,
        cancel: &CancellationToken,
        ctx: &Arc<C>,
        on_item: F,
    ) -> Result<ExecutionSummary, PipelineError>
    where
        F: FnMut(ResultEnvelope<Out>) + Send,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", pipeline = %self.name, run_id = %run_id);
        self.run_inner(run_id, cancel, ctx, on_item)
            .instrument(span)
            .await
    }

    async fn run_inner<F>(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
        ctx: &Arc<C>,
        mut on_item: F,
    ) -> Result<ExecutionSummary, PipelineError>
    where
        F: FnMut(ResultEnvelope<Out>) + Send,
    {
        let started_at = Utc::now();
        let start = Instant::now();

        // A child token lets fail-fast cancel this run without touching the caller's token.
        // Dropping it on return unhooks it from the caller's token.
        let run_cancel = cancel.child();
        let deadline = self.config.deadline.map(|d| run_cancel.cancel_after(d));
        let first_failure = Arc::new(Mutex::new(None));

        let scope = RunScope {
            pipeline: &self.name,
            run_id,
            cancel: &run_cancel,
            ctx,
            config: &self.config,
            first_failure: &first_failure,
        };

        info!(stages = self.stages.len(), "pipeline started");

        let wired = self.wire(&scope);
        let (final_stream, tasks) = match wired {
            Ok(wired) => wired,
            Err((err, launched)) => {
                warn!(
                    error = %err,
                    launched = launched.len(),
                    "wiring failed, cancelling launched stages"
                );
                run_cancel.cancel(format!("wiring failed: {err}"));
                join_all(launched, &run_cancel, self.config.shutdown_grace).await;
                if let Some(timer) = deadline {
                    timer.abort();
                }
                return Err(err);
            }
        };

        let mut drained_items = 0_u64;
        let drain = match final_stream.downcast::<Out>() {
            Ok(mut rx) => loop {
                match rx.recv().await {
                    Ok(Some(envelope)) => {
                        drained_items += 1;
                        on_item(envelope);
                    }
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err),
                }
            },
            Err(found) => {
                let err = PipelineError::FinalType {
                    expected: TypeDescriptor::of::<Out>().name(),
                    found: found.descriptor().name(),
                };
                run_cancel.cancel(err.to_string());
                drop(found);
                join_all(tasks, &run_cancel, self.config.shutdown_grace).await;
                if let Some(timer) = deadline {
                    timer.abort();
                }
                return Err(err);
            }
        };
        if let Err(err) = &drain {
            debug!(error = %err, drained = drained_items, "final drain interrupted");
        }

        let mut results = join_all(tasks, &run_cancel, self.config.shutdown_grace).await;
        if let Some(timer) = deadline {
            timer.abort();
        }
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        for (outcome, _) in &results {
            if outcome.state == StageState::Completed {
                debug!(
                    stage = %outcome.name,
                    items = outcome.items_emitted,
                    state = %outcome.state,
                    "stage finished"
                );
            } else {
                warn!(
                    stage = %outcome.name,
                    items = outcome.items_emitted,
                    state = %outcome.state,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "stage did not complete"
                );
            }
        }

        if self.config.error_policy == ErrorPolicy::Surface {
            // Prefer the stage that tripped fail-fast; panics never record themselves.
            let recorded = *first_failure.lock();
            let failed = recorded
                .filter(|&index| results[index].0.state == StageState::Failed)
                .or_else(|| results.iter().position(|(o, _)| o.state == StageState::Failed));

            if let Some(index) = failed {
                let (outcome, error) = &mut results[index];
                let source = error.take().unwrap_or_else(|| {
                    StageError::failed(outcome.error.clone().unwrap_or_default())
                });
                return Err(PipelineError::Stage {
                    stage: outcome.name.clone(),
                    source,
                });
            }

            let interrupted = drain.is_err()
                || results.iter().any(|(o, _)| o.state == StageState::Cancelled);
            if interrupted {
                return Err(PipelineError::Cancelled {
                    reason: run_cancel
                        .reason()
                        .unwrap_or_else(|| "cancelled".to_string()),
                });
            }
        }

        info!(
            drained = drained_items,
            duration_ms,
            "pipeline finished"
        );

        Ok(ExecutionSummary {
            pipeline: self.name.clone(),
            run_id,
            started_at,
            duration_ms,
            drained_items,
            stages: results.into_iter().map(|(outcome, _)| outcome).collect(),
        })
    }

    /// Walks the adapters left to right, threading each output into the next.
    ///
    /// On failure the tasks launched so far are handed back with the error.
    fn wire(&self, scope: &RunScope<'_, C>) -> Result<Wired, (PipelineError, Vec<StageTask>)> {
        let mut tasks = Vec::with_capacity(self.stages.len());
        let mut current: Option<AnyStream> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let (next, task) = match stage.launch(index, current.take(), scope) {
                Ok(launched) => launched,
                Err(err) => return Err((err, tasks)),
            };
            debug!(
                stage = stage.name(),
                index,
                input = ?stage.input(),
                output = ?stage.output(),
                "stage launched"
            );
            tasks.push(task);
            current = Some(next);
        }

        match current {
            Some(stream) => Ok((stream, tasks)),
            None => Err((
                PipelineError::Wiring {
                    stage: self.name.clone(),
                    message: "pipeline has no stages".to_string(),
                },
                tasks,
            )),
        }
    }
}

/// Joins every stage task in pipeline order.
///
/// Each returned pair holds the stage outcome and, for failed stages, the
/// stage's own error.
async fn join_all(
    tasks: Vec<StageTask>,
    cancel: &CancellationToken,
    grace: Duration,
) -> Vec<(StageOutcome, Option<StageError>)> {
    let mut results = Vec::with_capacity(tasks.len());

    for mut task in tasks {
        let joined = tokio::select! {
            biased;
            joined = &mut task.handle => Joined::Finished(joined),
            () = grace_elapsed(cancel, grace) => Joined::Abandoned,
        };

        let mut outcome = StageOutcome::new(task.name);
        outcome.advance(StageState::Running);
        outcome.items_emitted = task.emitted.load(Ordering::Relaxed);

        let (state, error) = match joined {
            Joined::Finished(Ok(Ok(()) | Err(StageError::DownstreamClosed))) => {
                (StageState::Completed, None)
            }
            Joined::Finished(Ok(Err(err))) if err.is_cancelled() => {
                outcome.error = Some(err.to_string());
                (StageState::Cancelled, None)
            }
            Joined::Finished(Ok(Err(err))) => {
                outcome.error = Some(err.to_string());
                (StageState::Failed, Some(err))
            }
            Joined::Finished(Err(join_err)) if join_err.is_cancelled() => {
                outcome.error = Some("stage task aborted".to_string());
                (StageState::Cancelled, None)
            }
            Joined::Finished(Err(join_err)) => {
                let err = StageError::failed(format!("stage task panicked: {join_err}"));
                outcome.error = Some(err.to_string());
                (StageState::Failed, Some(err))
            }
            Joined::Abandoned => {
                task.handle.abort();
                outcome.error = Some(format!(
                    "did not stop within {}ms of cancellation",
                    grace.as_millis()
                ));
                (StageState::Cancelled, None)
            }
        };

        if !outcome.advance(state) {
            warn!(
                stage = %outcome.name,
                index = task.index,
                %state,
                "illegal stage state transition"
            );
        }
        results.push((outcome, error));
    }

    results
}

/// Completes `grace` after `cancel` fired.
async fn grace_elapsed(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    let since = cancel
        .cancelled_at()
        .map_or(Duration::ZERO, |at| at.elapsed());
    tokio::time::sleep(grace.saturating_sub(since)).await;
}
