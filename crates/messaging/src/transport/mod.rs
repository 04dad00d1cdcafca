//! Transport layer for queue and topic access
//!
//! This module provides:
//! - [`Receiver`] trait for fetching, acknowledging and extending queue messages
//! - [`Sender`] trait for publishing single messages and batches to a topic
//! - [`InMemoryQueue`] and [`InMemoryTopic`] for local development and testing
//!
//! The wire protocol, authentication and any retries internal to a concrete
//! client live behind these traits. Everything in this crate is built on the
//! contracts defined here.

mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryQueue, InMemoryTopic, PublishedMessage};

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection, DNS or timeout failure
    #[error("network error: {0}")]
    Network(String),

    /// The remote service rejected the call
    #[error("service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Credentials missing, expired or insufficient
    #[error("authentication error: {0}")]
    Auth(String),

    /// Request rate exceeded
    #[error("throttled: {0}")]
    Throttled(String),
}

impl TransportError {
    /// Shorthand for a service error
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A raw message as returned by a fetch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Service-assigned message id
    pub message_id: String,

    /// Token identifying this particular receipt; required to acknowledge
    /// the message or change its visibility
    pub receipt_handle: String,

    /// Opaque message body
    pub body: String,

    /// Message attributes
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Parameters of a single fetch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub queue_url: String,

    /// Upper bound on messages returned
    pub max_messages: Option<u32>,

    /// Long-poll wait in seconds
    pub wait_time_seconds: Option<u32>,

    /// Lease applied to every fetched message, in seconds
    pub visibility_timeout_seconds: Option<u32>,

    /// Attributes to return with each message; `None` requests all of them
    #[serde(default)]
    pub attribute_names: Option<Vec<String>>,
}

/// A single-message publish call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic_arn: String,
    pub message: String,
    pub message_group_id: Option<String>,
}

/// One entry of a batch publish call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishBatchEntry {
    /// Caller-supplied id, unique within the batch
    pub id: String,
    pub message: String,
    pub message_group_id: Option<String>,
}

/// Entry accepted by the topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceededEntry {
    pub id: String,
    pub message_id: Option<String>,
}

/// Entry rejected by the topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: String,
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub sender_fault: bool,
}

/// Per-entry outcome of a batch publish call that reached the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishBatchOutput {
    pub successful: Vec<SucceededEntry>,
    pub failed: Vec<FailedEntry>,
}

/// Queue access used by the consumer pool and message handles
///
/// Implementations must be thread-safe; a single receiver is shared by every
/// poller of a pool.
#[async_trait]
pub trait Receiver: Send + Sync + 'static {
    /// Fetch up to `max_messages` messages, waiting at most the long-poll time
    ///
    /// An empty vector means the wait elapsed without any message arriving.
    /// Implementations return every attribute the message carries when
    /// `attribute_names` is `None`, and only the named ones otherwise.
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Delete a message so it is not redelivered
    async fn acknowledge(&self, queue_url: &str, receipt_handle: &str)
        -> Result<(), TransportError>;

    /// Change the remaining visibility window of a fetched message
    async fn extend_lease(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<(), TransportError>;
}

/// Topic access used by the publisher
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    /// Publish one message
    async fn publish_one(&self, request: PublishRequest) -> Result<(), TransportError>;

    /// Publish a batch of messages
    ///
    /// `Err` means the call itself failed and nothing can be assumed about
    /// the entries. Per-entry rejections are reported in
    /// [`PublishBatchOutput::failed`].
    async fn publish_many(
        &self,
        topic_arn: &str,
        entries: Vec<PublishBatchEntry>,
    ) -> Result<PublishBatchOutput, TransportError>;
}
