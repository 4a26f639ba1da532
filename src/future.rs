use crate::error::{ProducerError, ResultFailed};
use crate::result::ProduceResult;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

type Outcome = Result<ProduceResult, ResultFailed>;

/// Write-once completion cell handed to the caller of `send`.
///
/// Resolves exactly once: with the [`ProduceResult`] when the batch was
/// written, or with [`ProducerError::ResultFailed`] when it terminally
/// failed. Await it directly, or use [`ResultFuture::wait_timeout`] /
/// [`ResultFuture::try_result`].
#[derive(Debug)]
pub struct ResultFuture {
    rx: oneshot::Receiver<Outcome>,
}

/// Completing half, owned by the batch that carries the record.
#[derive(Debug)]
pub(crate) struct ResultSender {
    tx: oneshot::Sender<Outcome>,
}

pub(crate) fn result_channel() -> (ResultSender, ResultFuture) {
    let (tx, rx) = oneshot::channel();
    (ResultSender { tx }, ResultFuture { rx })
}

impl ResultSender {
    /// A caller that dropped its future simply never observes the outcome.
    pub(crate) fn complete(self, result: &ProduceResult) {
        let outcome = if result.is_successful() {
            Ok(result.clone())
        } else {
            Err(ResultFailed::new(result.clone()))
        };
        let _ = self.tx.send(outcome);
    }
}

fn map_outcome(received: Result<Outcome, oneshot::error::RecvError>) -> Result<ProduceResult, ProducerError> {
    match received {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(failed)) => Err(ProducerError::ResultFailed(failed)),
        // The completing side only disappears when the runtime is torn down
        // under a live producer.
        Err(_) => Err(ProducerError::ProducerClosed),
    }
}

impl ResultFuture {
    /// Waits at most `timeout`; `None` when the batch has not terminated yet.
    pub async fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<Result<ProduceResult, ProducerError>> {
        tokio::time::timeout(timeout, self).await.ok()
    }

    /// Non-blocking poll of the outcome.
    pub fn try_result(&mut self) -> Option<Result<ProduceResult, ProducerError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(map_outcome(Ok(outcome))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ProducerError::ProducerClosed)),
        }
    }
}

impl Future for ResultFuture {
    type Output = Result<ProduceResult, ProducerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(map_outcome)
    }
}
