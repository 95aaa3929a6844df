//! Stage trait and implementations.
//!
//! A stage consumes a stream of typed envelopes and produces another, sharing
//! one context value `C` with every other stage of the run.

use crate::cancellation::CancellationToken;
use crate::errors::StageError;
use crate::stream::{StageReceiver, StageSender};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// Trait for pipeline stages.
///
/// `Input` and `Output` declare the item types flowing in and out; the builder
/// only lets a stage follow one whose `Output` equals its `Input`.
#[async_trait]
pub trait Stage<C>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    /// Item type consumed. Sources use `()` and receive no input stream.
    type Input: Send + 'static;
    /// Item type produced.
    type Output: Send + 'static;

    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Processes the input stream into the output stream.
    ///
    /// # Arguments
    ///
    /// * `cancel` - The run's cancellation signal
    /// * `input` - The upstream stream, `None` for a source
    /// * `output` - The downstream stream; dropped (and so closed) on return
    /// * `ctx` - The context shared by every stage of the run
    ///
    /// Sends and receives through the streams already race `cancel`; a stage
    /// doing long work between them should check `cancel` itself.
    async fn process(
        &self,
        cancel: &CancellationToken,
        input: Option<StageReceiver<Self::Input>>,
        output: StageSender<Self::Output>,
        ctx: &C,
    ) -> Result<(), StageError>;
}

/// A stage that produces items without consuming any.
pub trait Source<C>: Stage<C, Input = ()>
where
    C: Send + Sync + 'static,
{
}

impl<C, S> Source<C> for S
where
    C: Send + Sync + 'static,
    S: Stage<C, Input = ()>,
{
}

/// A source built from a closure returning every item to emit.
pub struct FnSource<C, T, F> {
    name: String,
    produce: F,
    _marker: PhantomData<fn(&C) -> T>,
}

impl<C, T, F> FnSource<C, T, F>
where
    F: Fn(&C) -> Vec<T> + Send + Sync + 'static,
{
    /// Creates a new function-based source.
    pub fn new(name: impl Into<String>, produce: F) -> Self {
        Self {
            name: name.into(),
            produce,
            _marker: PhantomData,
        }
    }
}

impl<C, T, F> Debug for FnSource<C, T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<C, T, F> Stage<C> for FnSource<C, T, F>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(&C) -> Vec<T> + Send + Sync + 'static,
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
        ctx: &C,
    ) -> Result<(), StageError> {
        for item in (self.produce)(ctx) {
            output.send_item(item).await?;
        }
        Ok(())
    }
}

/// A stage applying a function to every payload. Signals pass through untouched.
pub struct MapStage<C, In, Out, F> {
    name: String,
    func: F,
    _marker: PhantomData<fn(In, &C) -> Out>,
}

impl<C, In, Out, F> MapStage<C, In, Out, F>
where
    F: Fn(In, &C) -> Out + Send + Sync + 'static,
{
    /// Creates a new mapping stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _marker: PhantomData,
        }
    }
}

impl<C, In, Out, F> Debug for MapStage<C, In, Out, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<C, In, Out, F> Stage<C> for MapStage<C, In, Out, F>
where
    C: Send + Sync + 'static,
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In, &C) -> Out + Send + Sync + 'static,
{
    type Input = In;
    type Output = Out;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        input: Option<StageReceiver<In>>,
        output: StageSender<Out>,
        ctx: &C,
    ) -> Result<(), StageError> {
        let Some(mut input) = input else {
            return Ok(());
        };
        while let Some(envelope) = input.recv().await? {
            output.send(envelope.map(|item| (self.func)(item, ctx))).await?;
        }
        Ok(())
    }
}

/// A stage keeping only payloads accepted by a predicate.
///
/// Envelopes carrying an error or exit signal are always forwarded so the
/// consumer can observe them.
pub struct FilterStage<C, T, F> {
    name: String,
    predicate: F,
    _marker: PhantomData<fn(&T, &C) -> bool>,
}

impl<C, T, F> FilterStage<C, T, F>
where
    F: Fn(&T, &C) -> bool + Send + Sync + 'static,
{
    /// Creates a new filtering stage.
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
            _marker: PhantomData,
        }
    }
}

impl<C, T, F> Debug for FilterStage<C, T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<C, T, F> Stage<C> for FilterStage<C, T, F>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(&T, &C) -> bool + Send + Sync + 'static,
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
        ctx: &C,
    ) -> Result<(), StageError> {
        let Some(mut input) = input else {
            return Ok(());
        };
        while let Some(envelope) = input.recv().await? {
            let signalled = envelope.has_error() || envelope.should_exit;
            if signalled || (!envelope.is_skipped && (self.predicate)(&envelope.item, ctx)) {
                output.send(envelope).await?;
            }
        }
        Ok(())
    }
}

/// A pass-through stage recording every payload it forwards.
#[derive(Debug)]
pub struct CollectSink<T> {
    name: String,
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> CollectSink<T> {
    /// Creates a new collecting stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a handle to the collected items that outlives the stage.
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.items)
    }
}

#[async_trait]
impl<C, T> Stage<C> for CollectSink<T>
where
    C: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
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
        while let Some(envelope) = input.recv().await? {
            if envelope.is_ok() {
                self.items.lock().push(envelope.item.clone());
            }
            output.send(envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResultEnvelope;
    use crate::stream::bounded;

    fn token() -> Arc<CancellationToken> {
        Arc::new(CancellationToken::new())
    }

    async fn drain<T: Send>(mut rx: StageReceiver<T>) -> Vec<ResultEnvelope<T>> {
        let mut out = Vec::new();
        while let Some(env) = rx.recv().await.unwrap() {
            out.push(env);
        }
        out
    }

    #[tokio::test]
    async fn test_fn_source_reads_context() {
        let cancel = token();
        let stage = FnSource::new("numbers", |limit: &u32| (0..*limit).collect::<Vec<_>>());
        assert_eq!(Stage::<u32>::name(&stage), "numbers");

        let (tx, rx) = bounded(8, cancel.clone());
        stage.process(&cancel, None, tx, &3).await.unwrap();

        let items: Vec<u32> = drain(rx).await.into_iter().map(ResultEnvelope::into_item).collect();
        assert_eq!(items, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_map_and_filter() {
        let cancel = token();
        let (src_tx, src_rx) = bounded::<i32>(8, cancel.clone());
        for i in 1..=5 {
            src_tx.send_item(i).await.unwrap();
        }
        src_tx.send(ResultEnvelope::failed(0, StageError::failed("bad"))).await.unwrap();
        drop(src_tx);

        let filter = FilterStage::new("even", |n: &i32, _ctx: &()| n % 2 == 0);
        let (mid_tx, mid_rx) = bounded(8, cancel.clone());
        filter.process(&cancel, Some(src_rx), mid_tx, &()).await.unwrap();

        let map = MapStage::new("square", |n: i32, _ctx: &()| n * n);
        let (out_tx, out_rx) = bounded(8, cancel.clone());
        map.process(&cancel, Some(mid_rx), out_tx, &()).await.unwrap();

        let out = drain(out_rx).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].item, 4);
        assert_eq!(out[1].item, 16);
        // The error envelope bypasses the predicate
        assert!(out[2].has_error());
    }

    #[tokio::test]
    async fn test_collect_sink_records_ok_items() {
        let cancel = token();
        let sink = CollectSink::new("sink");
        let handle = sink.handle();

        let (src_tx, src_rx) = bounded(4, cancel.clone());
        src_tx.send_item("a".to_string()).await.unwrap();
        src_tx.send(ResultEnvelope::skipped(String::new())).await.unwrap();
        drop(src_tx);

        let (out_tx, out_rx) = bounded(4, cancel.clone());
        Stage::<()>::process(&sink, &cancel, Some(src_rx), out_tx, &()).await.unwrap();

        assert_eq!(*handle.lock(), vec!["a".to_string()]);
        assert_eq!(drain(out_rx).await.len(), 2);
    }
}
