use crate::error::ProducerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};

/// How long `acquire` may wait for memory, derived from `max_block_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    Forever,
    NoWait,
    Timeout(Duration),
}

impl BlockPolicy {
    pub fn from_max_block_ms(max_block_ms: i64) -> Self {
        match max_block_ms {
            ms if ms < 0 => BlockPolicy::Forever,
            0 => BlockPolicy::NoWait,
            ms => BlockPolicy::Timeout(Duration::from_millis(ms as u64)),
        }
    }
}

/// Global byte budget for records admitted but not yet terminally completed.
///
/// Backed by a fair semaphore: waiters are served in FIFO order, so a large
/// request is never starved by a stream of small ones. Acquired bytes are
/// detached from their permits and handed back explicitly with
/// [`MemoryController::release`] when the batch carrying them terminates.
#[derive(Debug)]
pub struct MemoryController {
    semaphore: Arc<Semaphore>,
    total_size_in_bytes: usize,
    max_block_ms: i64,
}

impl MemoryController {
    pub fn new(total_size_in_bytes: usize, max_block_ms: i64) -> Self {
        MemoryController {
            semaphore: Arc::new(Semaphore::new(total_size_in_bytes)),
            total_size_in_bytes,
            max_block_ms,
        }
    }

    /// Waits until `n` more bytes fit under the cap, then claims them.
    pub async fn acquire(&self, n: usize) -> Result<(), ProducerError> {
        let permits = self.permits(n)?;
        match BlockPolicy::from_max_block_ms(self.max_block_ms) {
            BlockPolicy::NoWait => return self.try_acquire(n),
            BlockPolicy::Forever => {
                let permit = self
                    .semaphore
                    .acquire_many(permits)
                    .await
                    .map_err(|_| ProducerError::ProducerClosed)?;
                permit.forget();
            }
            BlockPolicy::Timeout(timeout) => {
                match tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await {
                    Ok(Ok(permit)) => permit.forget(),
                    Ok(Err(_)) => return Err(ProducerError::ProducerClosed),
                    Err(_) => {
                        return Err(ProducerError::Timeout {
                            max_block_ms: self.max_block_ms,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    /// Claims `n` bytes only if they are available right now.
    pub fn try_acquire(&self, n: usize) -> Result<(), ProducerError> {
        let permits = self.permits(n)?;
        match self.semaphore.try_acquire_many(permits) {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(TryAcquireError::NoPermits) => Err(ProducerError::Timeout {
                max_block_ms: self.max_block_ms.max(0),
            }),
            Err(TryAcquireError::Closed) => Err(ProducerError::ProducerClosed),
        }
    }

    pub fn release(&self, n: usize) {
        if n > 0 {
            self.semaphore.add_permits(n);
        }
    }

    /// Fails every current and future waiter with `ProducerClosed`.
    /// Releases keep working so in-flight batches can still return memory.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn in_flight(&self) -> usize {
        self.total_size_in_bytes
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn permits(&self, n: usize) -> Result<u32, ProducerError> {
        if n > self.total_size_in_bytes {
            return Err(ProducerError::invalid_argument(format!(
                "the log size {} is larger than totalSizeInBytes {}",
                n, self.total_size_in_bytes
            )));
        }
        u32::try_from(n).map_err(|_| {
            ProducerError::invalid_argument(format!("the log size {} is too large", n))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_policy_from_max_block_ms() {
        assert_eq!(BlockPolicy::from_max_block_ms(-1), BlockPolicy::Forever);
        assert_eq!(BlockPolicy::from_max_block_ms(0), BlockPolicy::NoWait);
        assert_eq!(
            BlockPolicy::from_max_block_ms(250),
            BlockPolicy::Timeout(Duration::from_millis(250))
        );
    }

    #[tokio::test]
    async fn acquire_and_release_track_in_flight() {
        let memory = MemoryController::new(100, 0);
        memory.acquire(60).await.unwrap();
        assert_eq!(memory.in_flight(), 60);
        assert!(matches!(memory.try_acquire(41), Err(ProducerError::Timeout { .. })));
        memory.acquire(40).await.unwrap();
        assert_eq!(memory.available(), 0);
        memory.release(100);
        assert_eq!(memory.in_flight(), 0);
    }

    #[tokio::test]
    async fn times_out_when_memory_stays_exhausted() {
        let memory = MemoryController::new(10, 20);
        memory.acquire(10).await.unwrap();
        let err = memory.acquire(1).await.unwrap_err();
        assert!(matches!(err, ProducerError::Timeout { max_block_ms: 20 }));
    }

    #[tokio::test]
    async fn waiter_wakes_on_release() {
        let memory = Arc::new(MemoryController::new(10, -1));
        memory.acquire(10).await.unwrap();
        let waiter = {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move { memory.acquire(8).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        memory.release(10);
        waiter.await.unwrap().unwrap();
        assert_eq!(memory.in_flight(), 8);
    }

    #[tokio::test]
    async fn close_fails_waiters_but_keeps_release() {
        let memory = Arc::new(MemoryController::new(10, -1));
        memory.acquire(10).await.unwrap();
        let waiter = {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move { memory.acquire(5).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        memory.close();
        assert!(matches!(waiter.await.unwrap(), Err(ProducerError::ProducerClosed)));
        memory.release(10);
        assert_eq!(memory.in_flight(), 0);
    }

    #[tokio::test]
    async fn rejects_requests_above_the_cap() {
        let memory = MemoryController::new(10, -1);
        assert!(matches!(
            memory.acquire(11).await,
            Err(ProducerError::InvalidArgument(_))
        ));
    }
}
