//! Mock stages for testing.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::StageError;
use crate::stages::Stage;
use crate::stream::{StageReceiver, StageSender};

/// A source emitting a fixed list of items and counting its runs.
#[derive(Debug)]
pub struct VecSource<T> {
    name: String,
    items: Vec<T>,
    runs: Arc<AtomicUsize>,
}

impl<T: Clone> VecSource<T> {
    /// Creates a new source emitting `items` in order.
    #[must_use]
    pub fn new(name: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            items,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a counter of how many times the source has started.
    #[must_use]
    pub fn runs(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

#[async_trait]
impl<C, T> Stage<C> for VecSource<T>
where
    C: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Input = ();
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        _input: Option<StageReceiver<()>>,
        output: StageSender<T>,
        _ctx: &C,
    ) -> Result<(), StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for item in &self.items {
            output.send_item(item.clone()).await?;
        }
        Ok(())
    }
}

/// A source emitting `0, 1, 2, ...` until cancelled or its consumer goes away.
#[derive(Debug)]
pub struct EndlessSource {
    name: String,
    interval: Duration,
}

impl EndlessSource {
    /// Creates a new endless source pausing `interval` between items.
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }
}

#[async_trait]
impl<C> Stage<C> for EndlessSource
where
    C: Send + Sync + 'static,
{
    type Input = ();
    type Output = u64;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        _input: Option<StageReceiver<()>>,
        output: StageSender<u64>,
        _ctx: &C,
    ) -> Result<(), StageError> {
        let mut next = 0_u64;
        loop {
            output.send_item(next).await?;
            next += 1;
            if !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }
    }
}

/// A pass-through stage that fails after forwarding `fail_after` items.
#[derive(Debug)]
pub struct FailingStage<T> {
    name: String,
    fail_after: usize,
    error: String,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> FailingStage<T> {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, fail_after: usize, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_after,
            error: error.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, T> Stage<C> for FailingStage<T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        input: Option<StageReceiver<T>>,
        output: StageSender<T>,
        _ctx: &C,
    ) -> Result<(), StageError> {
        let mut forwarded = 0;
        if let Some(mut input) = input {
            while let Some(envelope) = input.recv().await? {
                if forwarded == self.fail_after {
                    break;
                }
                output.send(envelope).await?;
                forwarded += 1;
            }
        }
        Err(StageError::failed(self.error.clone()))
    }
}

/// A stage that never reads its input and ignores cancellation.
///
/// Only the executor's shutdown grace period gets rid of it.
#[derive(Debug)]
pub struct StallingStage<T> {
    name: String,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> StallingStage<T> {
    /// Creates a new stalling stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, T> Stage<C> for StallingStage<T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        _input: Option<StageReceiver<T>>,
        _output: StageSender<T>,
        _ctx: &C,
    ) -> Result<(), StageError> {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

/// A pass-through stage that stops reading after `limit` items.
#[derive(Debug)]
pub struct TakeStage<T> {
    name: String,
    limit: usize,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> TakeStage<T> {
    /// Creates a new take stage.
    #[must_use]
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, T> Stage<C> for TakeStage<T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        input: Option<StageReceiver<T>>,
        output: StageSender<T>,
        _ctx: &C,
    ) -> Result<(), StageError> {
        let Some(mut input) = input else {
            return Ok(());
        };
        for _ in 0..self.limit {
            match input.recv().await? {
                Some(envelope) => output.send(envelope).await?,
                None => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::bounded;

    #[tokio::test]
    async fn test_vec_source_counts_runs() {
        let cancel = Arc::new(CancellationToken::new());
        let source = VecSource::new("src", vec![1, 2]);
        let runs = source.runs();

        let (tx, mut rx) = bounded(4, cancel.clone());
        Stage::<()>::process(&source, &cancel, None, tx, &()).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().unwrap().item, 1);
    }

    #[tokio::test]
    async fn test_failing_stage_fails_after_limit() {
        let cancel = Arc::new(CancellationToken::new());
        let (in_tx, in_rx) = bounded(4, cancel.clone());
        for i in 0..3 {
            in_tx.send_item(i).await.unwrap();
        }
        drop(in_tx);

        let stage = FailingStage::new("fail", 2, "boom");
        let (out_tx, out_rx) = bounded::<i32>(4, cancel.clone());
        let err = Stage::<()>::process(&stage, &cancel, Some(in_rx), out_tx, &())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        drop(out_rx);
    }
}
