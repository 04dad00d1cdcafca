//! Consumed message handle

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::pool::{PollerPool, PoolContext};
use crate::transport::{ReceivedMessage, TransportError};

/// Message handle errors
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The transport call failed; surfaced verbatim, never retried here
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The pool that produced this message no longer exists
    #[error("the pool that produced this message has been dropped")]
    PoolDropped,

    /// The body is not valid JSON for the requested type
    #[error("failed to decode message body: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A message fetched by a [`PollerPool`]
///
/// The handle keeps a non-owning reference back to the pool's transport so
/// it can be acknowledged or have its lease extended. It does not keep the
/// pool alive; once the pool and all of its pollers are gone, both
/// operations fail with [`MessageError::PoolDropped`].
///
/// A message that is neither acknowledged nor extended becomes visible to
/// other consumers again when its lease expires.
#[derive(Debug, Clone)]
pub struct Message {
    raw: ReceivedMessage,
    pool: Weak<PoolContext>,
}

impl Message {
    pub(crate) fn new(raw: ReceivedMessage, pool: &Arc<PoolContext>) -> Self {
        Self {
            raw,
            pool: Arc::downgrade(pool),
        }
    }

    /// Service-assigned message id
    pub fn id(&self) -> &str {
        &self.raw.message_id
    }

    /// Receipt token of this delivery
    pub fn receipt_handle(&self) -> &str {
        &self.raw.receipt_handle
    }

    /// Raw message body
    pub fn body(&self) -> &str {
        &self.raw.body
    }

    /// All message attributes
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.raw.attributes
    }

    /// A single attribute, if present
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.raw.attributes.get(name).map(String::as_str)
    }

    /// Deserialize the JSON body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_str(&self.raw.body).map_err(MessageError::Decode)
    }

    /// The underlying transport message
    pub fn raw(&self) -> &ReceivedMessage {
        &self.raw
    }

    /// Whether this message was produced by `pool`
    pub fn is_from(&self, pool: &PollerPool) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool.context()))
    }

    /// Delete the message from the queue so it is not redelivered
    #[instrument(skip(self), fields(message_id = %self.raw.message_id))]
    pub async fn acknowledge(&self) -> Result<(), MessageError> {
        let pool = self.pool.upgrade().ok_or(MessageError::PoolDropped)?;
        pool.receiver
            .acknowledge(&pool.queue_url, &self.raw.receipt_handle)
            .await?;
        debug!("Message acknowledged");
        Ok(())
    }

    /// Change the message's remaining lease to `visibility_timeout_seconds`
    ///
    /// Use this when processing will outlast the lease granted at fetch time.
    #[instrument(skip(self), fields(message_id = %self.raw.message_id))]
    pub async fn extend(&self, visibility_timeout_seconds: u32) -> Result<(), MessageError> {
        let pool = self.pool.upgrade().ok_or(MessageError::PoolDropped)?;
        pool.receiver
            .extend_lease(
                &pool.queue_url,
                &self.raw.receipt_handle,
                visibility_timeout_seconds,
            )
            .await?;
        debug!("Message lease extended");
        Ok(())
    }
}
