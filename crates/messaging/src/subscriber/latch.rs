//! One-way latch used for the pool's start and stop guards

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Latch errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LatchError {
    #[error("latch is already set")]
    AlreadySet,
}

/// A concurrency-safe flag that can go from unset to set exactly once
///
/// Setting is a compare-and-swap, so among any number of concurrent callers
/// exactly one observes `Ok`. Tasks can also await the transition, which lets
/// a sleeping poller wake up as soon as the pool is stopped.
#[derive(Debug)]
pub struct Latch {
    flag: AtomicBool,
    notify: watch::Sender<bool>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            flag: AtomicBool::new(false),
            notify,
        }
    }

    /// Non-blocking read
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Set the latch; fails if it was already set
    pub fn set(&self) -> Result<(), LatchError> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LatchError::AlreadySet)?;
        self.notify.send_replace(true);
        Ok(())
    }

    /// Resolve once the latch is set
    pub async fn wait(&self) {
        let mut rx = self.notify.subscribe();
        // wait_for checks the current value first, so a set that happened
        // before subscribing is not missed
        let _ = rx.wait_for(|set| *set).await;
    }
}
