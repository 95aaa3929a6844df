//! Bounded, cancellation-aware hand-off queues between adjacent stages.
//!
//! Each queue has exactly one producer and one consumer. A full queue blocks
//! its writer, an empty queue blocks its reader, and both waits race the
//! run's [`CancellationToken`]. Dropping the receiver makes every later send
//! fail with [`StageError::DownstreamClosed`] instead of blocking.

use crate::cancellation::CancellationToken;
use crate::core::{wrap, ResultEnvelope};
use crate::errors::StageError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default queue capacity between two stages.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Creates a bounded stream of `capacity` envelopes.
///
/// # Panics
///
/// Panics if `capacity` is zero. `PipelineConfig` rejects that earlier.
#[must_use]
pub fn bounded<T: Send>(
    capacity: usize,
    cancel: Arc<CancellationToken>,
) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        StageSender {
            tx,
            cancel: cancel.clone(),
            sent: Arc::new(AtomicU64::new(0)),
        },
        StageReceiver { rx, cancel },
    )
}

fn cancelled_error(cancel: &CancellationToken) -> StageError {
    StageError::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}

/// Writing half of a stage stream. Dropping it closes the stream.
pub struct StageSender<T> {
    tx: mpsc::Sender<ResultEnvelope<T>>,
    cancel: Arc<CancellationToken>,
    sent: Arc<AtomicU64>,
}

impl<T: Send> StageSender<T> {
    /// Hands one envelope downstream, waiting while the queue is full.
    ///
    /// Returns [`StageError::Cancelled`] if cancellation fires first and
    /// [`StageError::DownstreamClosed`] if the consumer is gone.
    pub async fn send(&self, envelope: ResultEnvelope<T>) -> Result<(), StageError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled_error(&self.cancel)),
            sent = self.tx.send(envelope) => {
                sent.map_err(|_| StageError::DownstreamClosed)?;
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Wraps `item` with default signals and sends it.
    pub async fn send_item(&self, item: T) -> Result<(), StageError> {
        self.send(wrap(item)).await
    }

    /// Returns the number of envelopes accepted so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Returns true once the consumer has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn sent_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sent)
    }
}

impl<T> std::fmt::Debug for StageSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSender")
            .field("sent", &self.sent.load(Ordering::Relaxed))
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

/// Reading half of a stage stream.
pub struct StageReceiver<T> {
    rx: mpsc::Receiver<ResultEnvelope<T>>,
    cancel: Arc<CancellationToken>,
}

impl<T: Send> StageReceiver<T> {
    /// Waits for the next envelope.
    ///
    /// Returns `Ok(None)` once the producer finished and the queue is empty,
    /// or [`StageError::Cancelled`] if cancellation fires first.
    pub async fn recv(&mut self) -> Result<Option<ResultEnvelope<T>>, StageError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled_error(&self.cancel)),
            envelope = self.rx.recv() => Ok(envelope),
        }
    }

    /// Stops accepting new envelopes. Buffered ones can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> std::fmt::Debug for StageReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageReceiver")
            .field("buffered", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn token() -> Arc<CancellationToken> {
        Arc::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_fifo_order_and_close() {
        let (tx, mut rx) = bounded::<u32>(4, token());
        for i in 0..3 {
            tx.send_item(i).await.unwrap();
        }
        assert_eq!(tx.sent(), 3);
        drop(tx);

        let mut seen = Vec::new();
        while let Some(env) = rx.recv().await.unwrap() {
            seen.push(env.item);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_send_on_full_queue_unblocks_on_cancel() {
        let cancel = token();
        let (tx, _rx) = bounded::<u32>(1, cancel.clone());
        tx.send_item(1).await.unwrap();

        let blocked = tokio::spawn(async move { tx.send_item(2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel("stop");

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("send must unblock")
            .unwrap();
        assert!(matches!(result, Err(StageError::Cancelled(reason)) if reason == "stop"));
    }

    #[tokio::test]
    async fn test_recv_on_empty_queue_unblocks_on_cancel() {
        let cancel = token();
        let (_tx, mut rx) = bounded::<u32>(1, cancel.clone());

        let blocked = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel("stop");

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("recv must unblock")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = bounded::<u32>(1, token());
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.send_item(1).await.unwrap_err().is_downstream_closed());
        assert_eq!(tx.sent(), 0);
    }
}
