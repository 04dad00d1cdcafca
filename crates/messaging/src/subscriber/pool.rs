//! Consumer pool
//!
//! Runs a fixed number of pollers against one queue, fans their messages
//! into a single channel and shuts down by joining every poller before the
//! channels are closed.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use super::latch::Latch;
use super::message::Message;
use super::poller::QueuePoller;
use crate::reliability::BackoffPolicy;
use crate::transport::{FetchRequest, Receiver, TransportError};

/// Number of pollers used when the configuration asks for none
pub const DEFAULT_NUM_CONSUMERS: usize = 3;

/// Messages requested per fetch when the configuration leaves it unset
pub const DEFAULT_MAX_MESSAGES_PER_FETCH: u32 = 1;

/// Consumer pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerPoolConfig {
    /// Queue the pool consumes from
    pub queue_url: String,

    /// Messages requested per fetch (defaults to 1)
    pub max_messages_per_fetch: Option<u32>,

    /// Long-poll wait per fetch, in seconds. If no message arrives within
    /// the wait, the fetch returns an empty batch.
    pub wait_time_seconds: Option<u32>,

    /// How long fetched messages stay hidden from other consumers, in
    /// seconds. Should exceed the time needed to process a message.
    pub visibility_timeout_seconds: Option<u32>,

    /// Message attributes to fetch; `None` fetches all of them
    #[serde(default)]
    pub attribute_names: Option<Vec<String>>,

    /// Number of concurrent pollers (0 falls back to the default of 3)
    pub num_consumers: usize,

    /// Backoff applied by each poller after a failed fetch
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for PollerPoolConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            max_messages_per_fetch: None,
            wait_time_seconds: None,
            visibility_timeout_seconds: None,
            attribute_names: None,
            num_consumers: DEFAULT_NUM_CONSUMERS,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PollerPoolConfig {
    /// Create a configuration for `queue_url` with default settings
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            ..Default::default()
        }
    }

    /// Set messages requested per fetch
    pub fn with_max_messages_per_fetch(mut self, max: u32) -> Self {
        self.max_messages_per_fetch = Some(max.max(1));
        self
    }

    /// Set the long-poll wait
    pub fn with_wait_time_seconds(mut self, seconds: u32) -> Self {
        self.wait_time_seconds = Some(seconds);
        self
    }

    /// Set the lease applied to fetched messages
    pub fn with_visibility_timeout_seconds(mut self, seconds: u32) -> Self {
        self.visibility_timeout_seconds = Some(seconds);
        self
    }

    /// Fetch only the named message attributes
    pub fn with_attribute_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the number of pollers
    pub fn with_num_consumers(mut self, num: usize) -> Self {
        self.num_consumers = num;
        self
    }

    /// Set the fetch-failure backoff
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Effective number of messages requested per fetch
    pub fn messages_per_fetch(&self) -> u32 {
        self.max_messages_per_fetch
            .unwrap_or(DEFAULT_MAX_MESSAGES_PER_FETCH)
            .max(1)
    }

    fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            queue_url: self.queue_url.clone(),
            max_messages: Some(self.messages_per_fetch()),
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            attribute_names: self.attribute_names.clone(),
        }
    }
}

/// Pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, never consumed
    Created,
    /// Pollers are fetching
    Running,
    /// Stop requested, waiting for pollers to drain
    Stopping,
    /// All pollers exited and channels closed
    Stopped,
}

/// Consumer pool errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// `consume` was already called
    #[error("poller pool is already running")]
    AlreadyRunning,

    /// `stop` was already called
    #[error("poller pool is already stopped")]
    AlreadyStopped,

    /// `stop` called before `consume`
    #[error("poller pool is not running")]
    NotRunning,
}

/// Streams returned by [`PollerPool::consume`]
pub type PoolStreams = (mpsc::Receiver<Message>, mpsc::Receiver<TransportError>);

/// State shared between the pool, its pollers and the message handles
pub(crate) struct PoolContext {
    pub(crate) receiver: Arc<dyn Receiver>,
    pub(crate) queue_url: String,
}

/// Pool of concurrent queue pollers
///
/// A pool is single-use: it can be consumed once and stopped once. Further
/// calls to either return an error.
///
/// # Example
///
/// ```ignore
/// use harbor_messaging::subscriber::{PollerPool, PollerPoolConfig};
///
/// let config = PollerPoolConfig::new(queue_url)
///     .with_max_messages_per_fetch(10)
///     .with_wait_time_seconds(20)
///     .with_num_consumers(4);
///
/// let pool = PollerPool::new(receiver, config);
/// let (mut messages, mut errors) = pool.consume().await?;
///
/// while let Some(message) = messages.recv().await {
///     handle(message.body()).await?;
///     message.acknowledge().await?;
/// }
///
/// // Blocks until every poller has drained its current fetch
/// pool.stop().await?;
/// ```
pub struct PollerPool {
    context: Arc<PoolContext>,
    config: PollerPoolConfig,
    started: Latch,
    stopping: Arc<Latch>,
    finished: Arc<Latch>,
}

impl PollerPool {
    /// Create a pool; no poller runs until [`consume`](Self::consume)
    pub fn new(receiver: Arc<dyn Receiver>, mut config: PollerPoolConfig) -> Self {
        if config.num_consumers == 0 {
            config.num_consumers = DEFAULT_NUM_CONSUMERS;
        }
        Self {
            context: Arc::new(PoolContext {
                receiver,
                queue_url: config.queue_url.clone(),
            }),
            config,
            started: Latch::new(),
            stopping: Arc::new(Latch::new()),
            finished: Arc::new(Latch::new()),
        }
    }

    /// Start polling
    ///
    /// Spawns `num_consumers` pollers and returns the message and error
    /// channels they feed. The message channel holds one full fetch per
    /// poller; when it is full pollers wait, so a slow consumer throttles
    /// fetching. The error channel holds one error per poller.
    #[instrument(skip(self), fields(queue_url = %self.config.queue_url))]
    pub async fn consume(&self) -> Result<PoolStreams, PoolError> {
        if self.stopping.is_set() {
            return Err(PoolError::AlreadyStopped);
        }
        self.started
            .set()
            .map_err(|_| PoolError::AlreadyRunning)?;

        let num_consumers = self.config.num_consumers;
        let capacity = self.config.messages_per_fetch() as usize * num_consumers;
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(num_consumers);

        let request = self.config.fetch_request();
        let handles: Vec<_> = (1..=num_consumers)
            .map(|id| {
                let poller = QueuePoller::new(
                    id,
                    Arc::clone(&self.context),
                    request.clone(),
                    self.config.backoff.counter(),
                    Arc::clone(&self.stopping),
                    messages_tx.clone(),
                    errors_tx.clone(),
                );
                tokio::spawn(poller.run())
            })
            .collect();

        let finished = Arc::clone(&self.finished);
        tokio::spawn(async move {
            for result in join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Poller task failed");
                }
            }

            // Every poller has exited; no sender can race the close
            drop(messages_tx);
            drop(errors_tx);
            let _ = finished.set();
            info!("Poller pool stopped");
        });

        info!(
            num_consumers,
            max_messages_per_fetch = self.config.messages_per_fetch(),
            "Poller pool listening for messages"
        );
        Ok((messages_rx, errors_rx))
    }

    /// Stop polling and wait for every poller to exit
    ///
    /// In-flight fetches are allowed to complete, so this returns within one
    /// long-poll wait. When it returns both channels are closed.
    ///
    /// The stop request takes effect on the first poll. If the returned
    /// future is dropped before completing (for example under a timeout),
    /// the pool still drains, and [`stopped`](Self::stopped) can be awaited
    /// to observe the end of the drain.
    #[instrument(skip(self), fields(queue_url = %self.config.queue_url))]
    pub async fn stop(&self) -> Result<(), PoolError> {
        if !self.started.is_set() {
            return Err(PoolError::NotRunning);
        }
        self.stopping
            .set()
            .map_err(|_| PoolError::AlreadyStopped)?;

        debug!("Waiting for pollers to drain");
        self.finished.wait().await;
        Ok(())
    }

    /// Wait until every poller has exited and both channels are closed
    ///
    /// Can be awaited any number of times, from any number of tasks. Fails
    /// with [`PoolError::NotRunning`] if the pool was never consumed.
    pub async fn stopped(&self) -> Result<(), PoolError> {
        if !self.started.is_set() {
            return Err(PoolError::NotRunning);
        }
        self.finished.wait().await;
        Ok(())
    }

    /// Current lifecycle state
    pub fn status(&self) -> PoolStatus {
        if self.finished.is_set() {
            PoolStatus::Stopped
        } else if self.stopping.is_set() {
            PoolStatus::Stopping
        } else if self.started.is_set() {
            PoolStatus::Running
        } else {
            PoolStatus::Created
        }
    }

    /// The effective configuration
    pub fn config(&self) -> &PollerPoolConfig {
        &self.config
    }

    pub(crate) fn context(&self) -> &Arc<PoolContext> {
        &self.context
    }
}

impl Drop for PollerPool {
    fn drop(&mut self) {
        // Pollers of a pool dropped without stop() exit on their next check
        let _ = self.stopping.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryQueue;

    const QUEUE: &str = "memory://pool-test";

    #[test]
    fn test_default_config() {
        let config = PollerPoolConfig::default();
        assert_eq!(config.num_consumers, 3);
        assert_eq!(config.max_messages_per_fetch, None);
        assert_eq!(config.messages_per_fetch(), 1);
        assert_eq!(config.backoff, BackoffPolicy::exponential());
    }

    #[test]
    fn test_config_builder() {
        let config = PollerPoolConfig::new(QUEUE)
            .with_max_messages_per_fetch(10)
            .with_wait_time_seconds(20)
            .with_visibility_timeout_seconds(60)
            .with_num_consumers(5);

        assert_eq!(config.queue_url, QUEUE);
        assert_eq!(config.messages_per_fetch(), 10);

        let request = config.fetch_request();
        assert_eq!(request.max_messages, Some(10));
        assert_eq!(request.wait_time_seconds, Some(20));
        assert_eq!(request.visibility_timeout_seconds, Some(60));
        assert_eq!(request.attribute_names, None);

        let request = config.with_attribute_names(["TraceId"]).fetch_request();
        assert_eq!(request.attribute_names, Some(vec!["TraceId".to_string()]));
    }

    #[test]
    fn test_zero_consumers_falls_back_to_default() {
        let queue = Arc::new(InMemoryQueue::new(QUEUE));
        let pool = PollerPool::new(queue, PollerPoolConfig::new(QUEUE).with_num_consumers(0));
        assert_eq!(pool.config().num_consumers, DEFAULT_NUM_CONSUMERS);
    }

    #[test]
    fn test_config_serialization() {
        let config = PollerPoolConfig::new(QUEUE).with_max_messages_per_fetch(5);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PollerPoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let queue = Arc::new(InMemoryQueue::new(QUEUE));
        let pool = PollerPool::new(queue, PollerPoolConfig::new(QUEUE));
        assert_eq!(pool.status(), PoolStatus::Created);

        let (mut messages, mut errors) = pool.consume().await.unwrap();
        assert_eq!(pool.status(), PoolStatus::Running);

        pool.stop().await.unwrap();
        assert_eq!(pool.status(), PoolStatus::Stopped);

        assert!(messages.recv().await.is_none());
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_before_consume() {
        let queue = Arc::new(InMemoryQueue::new(QUEUE));
        let pool = PollerPool::new(queue, PollerPoolConfig::new(QUEUE));

        assert_eq!(pool.stop().await, Err(PoolError::NotRunning));
        assert_eq!(pool.status(), PoolStatus::Created);

        // The pool is still usable
        pool.consume().await.unwrap();
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_is_repeatable() {
        let queue = Arc::new(InMemoryQueue::new(QUEUE));
        let pool = PollerPool::new(queue, PollerPoolConfig::new(QUEUE));
        assert_eq!(pool.stopped().await, Err(PoolError::NotRunning));

        let _streams = pool.consume().await.unwrap();
        pool.stop().await.unwrap();

        assert_eq!(pool.stopped().await, Ok(()));
        assert_eq!(pool.stopped().await, Ok(()));
    }

    #[tokio::test]
    async fn test_misuse_errors() {
        let queue = Arc::new(InMemoryQueue::new(QUEUE));
        let pool = PollerPool::new(queue, PollerPoolConfig::new(QUEUE));

        let _streams = pool.consume().await.unwrap();
        assert_eq!(pool.consume().await.unwrap_err(), PoolError::AlreadyRunning);

        pool.stop().await.unwrap();
        assert_eq!(pool.stop().await, Err(PoolError::AlreadyStopped));
        assert_eq!(pool.consume().await.unwrap_err(), PoolError::AlreadyStopped);
    }
}
