//! Queue consumption
//!
//! This module provides:
//! - [`PollerPool`] - Concurrent pollers fanned into one message stream
//! - [`Message`] - Fetched message with acknowledge/extend operations
//! - [`Latch`] - One-way flag guarding start and stop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PollerPool                            │
//! │  ┌────────────┐  ┌────────────┐        ┌────────────┐       │
//! │  │ Poller 1   │  │ Poller 2   │  ...   │ Poller N   │       │
//! │  │ (backoff)  │  │ (backoff)  │        │ (backoff)  │       │
//! │  └─────┬──────┘  └─────┬──────┘        └─────┬──────┘       │
//! │        └───────────────┼─────────────────────┘              │
//! │                        ▼                                     │
//! │     messages: mpsc (batch × N)    errors: mpsc (N)           │
//! │                        │                                     │
//! │  Supervisor: join all pollers ──► close channels ──► done    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod latch;
mod message;
mod poller;
mod pool;

pub use latch::{Latch, LatchError};
pub use message::{Message, MessageError};
pub use pool::{
    PollerPool, PollerPoolConfig, PoolError, PoolStatus, PoolStreams,
    DEFAULT_MAX_MESSAGES_PER_FETCH, DEFAULT_NUM_CONSUMERS,
};
