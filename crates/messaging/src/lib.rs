//! # Harbor Messaging
//!
//! Client-side queue consumption and topic publishing on top of a pluggable
//! transport.
//!
//! ## Features
//!
//! - **Consumer pool**: A fixed set of concurrent pollers long-polling one queue,
//!   fanned into a single bounded message channel
//! - **Backoff**: Per-poller exponential backoff with jitter on fetch failures
//! - **Graceful shutdown**: `stop()` waits for every poller to finish its
//!   current fetch, then closes both channels
//! - **Batched publishing**: Arbitrary message sets split into protocol-sized
//!   chunks with per-message result reconciliation
//! - **In-memory transport**: Queue and topic implementations for local
//!   development and tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        PollerPool                     TopicPublisher         │
//! │  (pollers, backoff, fan-in)     (chunking, FIFO group ids)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Receiver / Sender (transport)                  │
//! │  (remote queue & topic, or InMemoryQueue / InMemoryTopic)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use harbor_messaging::prelude::*;
//!
//! let queue = Arc::new(InMemoryQueue::new("memory://orders"));
//! let pool = PollerPool::new(
//!     queue.clone(),
//!     PollerPoolConfig::new("memory://orders").with_num_consumers(2),
//! );
//!
//! let (mut messages, mut errors) = pool.consume().await?;
//! tokio::spawn(async move {
//!     while let Some(error) = errors.recv().await {
//!         tracing::warn!(%error, "Fetch failed");
//!     }
//! });
//!
//! while let Some(message) = messages.recv().await {
//!     let order: Order = message.decode()?;
//!     process(order).await?;
//!     message.acknowledge().await?;
//! }
//!
//! pool.stop().await?;
//! ```

pub mod config;
pub mod publisher;
pub mod reliability;
pub mod subscriber;
pub mod transport;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, MessagingConfig};
    pub use crate::publisher::{
        BatchMessage, BatchPublishError, BatchPublishOutcome, PublishError, PublisherConfig,
        RejectedEntry, TopicPublisher,
    };
    pub use crate::reliability::{Backoff, BackoffPolicy};
    pub use crate::subscriber::{
        Message, MessageError, PollerPool, PollerPoolConfig, PoolError, PoolStatus,
    };
    pub use crate::transport::{
        InMemoryQueue, InMemoryTopic, Receiver, Sender, TransportError,
    };
}

// Re-export key types at crate root
pub use config::{ConfigError, MessagingConfig};
pub use publisher::{
    BatchMessage, BatchPublishError, BatchPublishOutcome, PublishError, PublisherConfig,
    RejectedEntry, TopicPublisher,
};
pub use reliability::{Backoff, BackoffPolicy};
pub use subscriber::{Message, MessageError, PollerPool, PollerPoolConfig, PoolError, PoolStatus};
pub use transport::{InMemoryQueue, InMemoryTopic, Receiver, Sender, TransportError};
