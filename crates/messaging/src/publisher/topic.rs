//! Topic publisher

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::models::{BatchMessage, BatchPublishError, BatchPublishOutcome, PublishError};
use crate::transport::{PublishBatchEntry, PublishRequest, Sender};

/// Maximum entries accepted by a single batch publish call
pub const MAX_BATCH_SIZE: usize = 10;

/// Group id attached to every message published to a FIFO topic
pub const DEFAULT_MESSAGE_GROUP_ID: &str = "default";

/// Whether `topic_arn` names a FIFO topic
///
/// This is a naming heuristic: any identifier containing "fifo" in any case
/// is treated as FIFO.
pub fn is_fifo_topic(topic_arn: &str) -> bool {
    topic_arn.to_lowercase().contains("fifo")
}

/// Publisher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    /// Topic messages are published to
    pub topic_arn: String,
}

impl PublisherConfig {
    pub fn new(topic_arn: impl Into<String>) -> Self {
        Self {
            topic_arn: topic_arn.into(),
        }
    }
}

/// Publishes JSON-serialized messages to a topic
///
/// # Example
///
/// ```ignore
/// use harbor_messaging::publisher::{BatchMessage, PublisherConfig, TopicPublisher};
///
/// let publisher = TopicPublisher::new(sender, PublisherConfig::new(topic_arn));
///
/// publisher.publish(&order).await?;
///
/// let batch: Vec<_> = orders
///     .iter()
///     .map(|o| BatchMessage::new(o.id.to_string(), o))
///     .collect();
/// let outcome = publisher.publish_batch(&batch).await?;
/// for (id, rejection) in outcome.rejected() {
///     tracing::warn!(%id, %rejection, "Order not published");
/// }
/// ```
pub struct TopicPublisher {
    sender: Arc<dyn Sender>,
    config: PublisherConfig,
    fifo: bool,
}

impl TopicPublisher {
    pub fn new(sender: Arc<dyn Sender>, config: PublisherConfig) -> Self {
        let fifo = is_fifo_topic(&config.topic_arn);
        Self {
            sender,
            config,
            fifo,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Whether messages get the default group id attached
    pub fn is_fifo(&self) -> bool {
        self.fifo
    }

    fn group_id(&self) -> Option<String> {
        self.fifo.then(|| DEFAULT_MESSAGE_GROUP_ID.to_string())
    }

    /// Publish a single message
    #[instrument(skip_all, fields(topic_arn = %self.config.topic_arn))]
    pub async fn publish<T>(&self, message: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(message)?;

        self.sender
            .publish_one(PublishRequest {
                topic_arn: self.config.topic_arn.clone(),
                message: body,
                message_group_id: self.group_id(),
            })
            .await?;

        debug!("Message published");
        Ok(())
    }

    /// Publish messages in chunks of at most [`MAX_BATCH_SIZE`]
    ///
    /// Chunks are submitted one after another, in order. Entries the topic
    /// rejects are recorded in the outcome and do not stop the call. A
    /// serialization failure or a failed submission aborts immediately:
    /// the error carries the results gathered so far, and later chunks are
    /// never sent.
    #[instrument(skip_all, fields(topic_arn = %self.config.topic_arn, count = messages.len()))]
    pub async fn publish_batch<T>(
        &self,
        messages: &[BatchMessage<T>],
    ) -> Result<BatchPublishOutcome, BatchPublishError>
    where
        T: Serialize,
    {
        let mut outcome = BatchPublishOutcome::default();
        let group_id = self.group_id();

        for (index, chunk) in messages.chunks(MAX_BATCH_SIZE).enumerate() {
            let mut entries = Vec::with_capacity(chunk.len());
            for message in chunk {
                let body = match serde_json::to_string(&message.data) {
                    Ok(body) => body,
                    Err(e) => {
                        return Err(BatchPublishError {
                            partial: outcome,
                            source: e.into(),
                        })
                    }
                };
                entries.push(PublishBatchEntry {
                    id: message.id.clone(),
                    message: body,
                    message_group_id: group_id.clone(),
                });
            }

            debug!(chunk = index, size = entries.len(), "Submitting batch");
            let output = match self
                .sender
                .publish_many(&self.config.topic_arn, entries)
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    return Err(BatchPublishError {
                        partial: outcome,
                        source: e.into(),
                    })
                }
            };

            let submitted: HashSet<&str> = chunk.iter().map(|m| m.id.as_str()).collect();

            for failed in output.failed {
                if !submitted.contains(failed.id.as_str()) {
                    warn!(id = %failed.id, "Ignoring result for unknown batch entry");
                    continue;
                }
                outcome.record_failure(failed.id.clone(), failed.into());
            }
            for succeeded in output.successful {
                if !submitted.contains(succeeded.id.as_str()) {
                    warn!(id = %succeeded.id, "Ignoring result for unknown batch entry");
                    continue;
                }
                outcome.record_success(succeeded.id);
            }
        }

        debug!(
            published = outcome.success_count,
            rejected = outcome.error_count,
            "Batch publish finished"
        );
        Ok(outcome)
    }
}
