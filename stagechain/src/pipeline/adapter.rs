//! Type-erased stage adapters.
//!
//! Each adapter remembers its stage's declared input and output
//! [`TypeDescriptor`]s and knows how to turn an opaque upstream stream into a
//! typed one, spawn the stage, and hand back an opaque downstream stream.

use super::PipelineConfig;
use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, StageError};
use crate::stages::Stage;
use crate::stream::{self, StageReceiver, StageSender};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};
use uuid::Uuid;

/// Identity of an item type, compared when stages are chained.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
}

impl TypeDescriptor {
    /// Describes `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the type's name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// An opaque stream handle passed between adapters.
pub(crate) struct AnyStream {
    inner: Box<dyn Any + Send>,
    descriptor: TypeDescriptor,
}

impl AnyStream {
    pub(crate) fn new<T: Send + 'static>(rx: StageReceiver<T>) -> Self {
        Self {
            inner: Box::new(rx),
            descriptor: TypeDescriptor::of::<T>(),
        }
    }

    pub(crate) fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// Recovers the typed receiver, or hands the stream back on mismatch.
    pub(crate) fn downcast<T: Send + 'static>(self) -> Result<StageReceiver<T>, Self> {
        if self.descriptor != TypeDescriptor::of::<T>() {
            return Err(self);
        }
        match self.inner.downcast::<StageReceiver<T>>() {
            Ok(rx) => Ok(*rx),
            Err(inner) => Err(Self {
                inner,
                descriptor: self.descriptor,
            }),
        }
    }
}

/// Everything a launching adapter needs from the current run.
pub(crate) struct RunScope<'a, C> {
    pub pipeline: &'a str,
    pub run_id: Uuid,
    pub cancel: &'a Arc<CancellationToken>,
    pub ctx: &'a Arc<C>,
    pub config: &'a PipelineConfig,
    /// Index of the first stage that failed, recorded by the failing task itself.
    pub first_failure: &'a Arc<Mutex<Option<usize>>>,
}

/// A launched stage task.
pub(crate) struct StageTask {
    pub index: usize,
    pub name: String,
    pub handle: JoinHandle<Result<(), StageError>>,
    pub emitted: Arc<AtomicU64>,
}

/// A stage with its concrete types erased.
pub(crate) trait ErasedStage<C>: Send + Sync {
    fn name(&self) -> &str;

    /// Declared input type, `None` for a source.
    fn input(&self) -> Option<TypeDescriptor>;

    fn output(&self) -> TypeDescriptor;

    /// Allocates the output stream and spawns the stage. Never blocks.
    fn launch(
        &self,
        index: usize,
        input: Option<AnyStream>,
        scope: &RunScope<'_, C>,
    ) -> Result<(AnyStream, StageTask), PipelineError>;
}

/// Adapter for the first stage of a chain.
pub(crate) struct SourceAdapter<S> {
    stage: Arc<S>,
}

impl<S> SourceAdapter<S> {
    pub(crate) fn new(stage: S) -> Self {
        Self {
            stage: Arc::new(stage),
        }
    }
}

impl<C, S> ErasedStage<C> for SourceAdapter<S>
where
    C: Send + Sync + 'static,
    S: Stage<C, Input = ()>,
{
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn input(&self) -> Option<TypeDescriptor> {
        None
    }

    fn output(&self) -> TypeDescriptor {
        TypeDescriptor::of::<S::Output>()
    }

    fn launch(
        &self,
        index: usize,
        _input: Option<AnyStream>,
        scope: &RunScope<'_, C>,
    ) -> Result<(AnyStream, StageTask), PipelineError> {
        Ok(spawn_stage(index, Arc::clone(&self.stage), None, scope))
    }
}

/// Adapter for every stage after the source.
pub(crate) struct TransformAdapter<S> {
    stage: Arc<S>,
}

impl<S> TransformAdapter<S> {
    pub(crate) fn new(stage: S) -> Self {
        Self {
            stage: Arc::new(stage),
        }
    }
}

impl<C, S> ErasedStage<C> for TransformAdapter<S>
where
    C: Send + Sync + 'static,
    S: Stage<C>,
{
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn input(&self) -> Option<TypeDescriptor> {
        Some(TypeDescriptor::of::<S::Input>())
    }

    fn output(&self) -> TypeDescriptor {
        TypeDescriptor::of::<S::Output>()
    }

    fn launch(
        &self,
        index: usize,
        input: Option<AnyStream>,
        scope: &RunScope<'_, C>,
    ) -> Result<(AnyStream, StageTask), PipelineError> {
        let name = self.stage.name().to_string();
        let Some(input) = input else {
            return Err(PipelineError::Wiring {
                stage: name,
                message: "no upstream stream to read from".to_string(),
            });
        };
        let rx = input
            .downcast::<S::Input>()
            .map_err(|found| PipelineError::Wiring {
                stage: name,
                message: format!(
                    "expected a stream of `{}` but received `{}`",
                    TypeDescriptor::of::<S::Input>().name(),
                    found.descriptor().name()
                ),
            })?;
        Ok(spawn_stage(index, Arc::clone(&self.stage), Some(rx), scope))
    }
}

fn spawn_stage<C, S>(
    index: usize,
    stage: Arc<S>,
    input: Option<StageReceiver<S::Input>>,
    scope: &RunScope<'_, C>,
) -> (AnyStream, StageTask)
where
    C: Send + Sync + 'static,
    S: Stage<C>,
{
    let (tx, rx): (StageSender<S::Output>, _) =
        stream::bounded(scope.config.buffer_size, Arc::clone(scope.cancel));
    let emitted = tx.sent_counter();
    let name = stage.name().to_string();

    let cancel = Arc::clone(scope.cancel);
    let ctx = Arc::clone(scope.ctx);
    let first_failure = Arc::clone(scope.first_failure);
    let fail_fast = scope.config.error_policy.is_fail_fast();
    let span = tracing::debug_span!(
        "stage",
        pipeline = %scope.pipeline,
        run_id = %scope.run_id,
        stage = %name,
        index
    );

    let handle = tokio::spawn(
        async move {
            debug!("stage running");
            // A panic counts as a failure so fail-fast still cancels the siblings.
            let result = AssertUnwindSafe(stage.process(&cancel, input, tx, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(StageError::failed(format!(
                        "stage task panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            if let Err(err) = &result {
                if !err.is_cancelled() && !err.is_downstream_closed() && fail_fast {
                    let first = *first_failure.lock().get_or_insert(index);
                    if first == index {
                        cancel.cancel(format!("stage '{}' failed: {err}", stage.name()));
                    }
                }
            }
            result
        }
        .instrument(span),
    );

    (
        AnyStream::new(rx),
        StageTask {
            index,
            name,
            handle,
            emitted,
        },
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
