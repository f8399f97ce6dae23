use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

/// Explicit limits for outbound text-generation traffic. Passed in by the
/// orchestration layer instead of living in ambient global state.
#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub max_concurrent: usize,
    pub queue_depth: usize,
    pub queue_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            queue_depth: 100,
            queue_timeout: Duration::from_secs(120),
            retry_attempts: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Bounded admission gate for external calls: at most `max_concurrent`
/// in flight, at most `queue_depth` waiting, and a cap on how long a
/// caller may wait for a slot.
#[derive(Clone)]
pub struct RequestGate {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    queue_depth: usize,
    queue_timeout: Duration,
}

impl RequestGate {
    pub fn new(limits: &ServiceLimits) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limits.max_concurrent)),
            waiting: Arc::new(AtomicUsize::new(0)),
            queue_depth: limits.queue_depth,
            queue_timeout: limits.queue_timeout,
        }
    }

    /// Waits for a slot. Fails fast when the queue is full and fails with a
    /// timeout error when no slot frees up in time.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }
        if self.waiting.load(Ordering::Relaxed) >= self.queue_depth {
            return Err(anyhow!("request queue is full"));
        }
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = timeout(
            self.queue_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        match permit {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(anyhow!("request gate is closed")),
            Err(_) => Err(anyhow!("request timed out waiting for a slot")),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
