use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Single-flight admission for downloads. One permit exists; a trigger that
/// cannot take it immediately is rejected, never queued.
#[derive(Clone)]
pub struct DownloadGate {
    permits: Arc<Semaphore>,
}

/// Proof that the holder owns the download slot. Dropping it releases the
/// slot, so every exit path of a flight (success, failure, timeout, panic of
/// the handling task) gives the permit back exactly once.
pub struct DownloadPermit {
    _permit: OwnedSemaphorePermit,
}

impl DownloadGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Non-blocking. `None` means a download is already in flight.
    pub fn try_acquire(&self) -> Option<DownloadPermit> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Some(DownloadPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }
}

impl Default for DownloadGate {
    fn default() -> Self {
        Self::new()
    }
}
