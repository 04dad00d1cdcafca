//! In-memory implementations of the transport traits
//!
//! These keep the same semantics as a managed queue/topic closely enough to
//! drive the consumer pool and publisher without network access: leases,
//! receipt handles, redelivery after lease expiry, long-poll waits and
//! per-entry batch rejections.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use super::*;
use crate::publisher::{is_fifo_topic, MAX_BATCH_SIZE};

/// Attribute carrying how many times a message has been received
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

/// Attribute carrying the enqueue time in epoch milliseconds
pub const SENT_TIMESTAMP_ATTRIBUTE: &str = "SentTimestamp";

const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u32 = 30;
const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;
const MAX_MESSAGES_PER_FETCH: u32 = 10;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 262_144;

/// Internal message state
struct QueuedMessage {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    receipt_handle: Option<String>,
    visible_at: Instant,
}

/// In-memory queue implementing [`Receiver`]
///
/// # Example
///
/// ```
/// use harbor_messaging::transport::InMemoryQueue;
///
/// let queue = InMemoryQueue::new("memory://orders");
/// queue.send("{\"order_id\": 1}");
/// assert_eq!(queue.len(), 1);
/// ```
pub struct InMemoryQueue {
    queue_url: String,
    messages: Mutex<VecDeque<QueuedMessage>>,
    fetch_errors: Mutex<VecDeque<TransportError>>,
    arrivals: Notify,
}

impl InMemoryQueue {
    /// Create an empty queue reachable under `queue_url`
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            messages: Mutex::new(VecDeque::new()),
            fetch_errors: Mutex::new(VecDeque::new()),
            arrivals: Notify::new(),
        }
    }

    /// The url this queue answers to
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Enqueue a message, returning its id
    pub fn send(&self, body: impl Into<String>) -> String {
        self.send_with_attributes(body, HashMap::new())
    }

    /// Enqueue a message with attributes, returning its id
    pub fn send_with_attributes(
        &self,
        body: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> String {
        let message_id = Uuid::now_v7().to_string();
        self.messages.lock().push_back(QueuedMessage {
            message_id: message_id.clone(),
            body: body.into(),
            attributes,
            receive_count: 0,
            receipt_handle: None,
            visible_at: Instant::now(),
        });
        self.arrivals.notify_waiters();
        message_id
    }

    /// Make the next fetch call fail with `error`
    ///
    /// Errors are consumed in the order they were pushed, one per fetch.
    pub fn push_fetch_error(&self, error: TransportError) {
        self.fetch_errors.lock().push_back(error);
    }

    /// Total number of messages held, visible or leased
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether the queue holds no messages at all
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Number of messages currently hidden by a lease
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.receipt_handle.is_some() && m.visible_at > now)
            .count()
    }

    fn check_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        if queue_url != self.queue_url {
            return Err(TransportError::service(
                "AWS.SimpleQueueService.NonExistentQueue",
                format!("queue does not exist: {}", queue_url),
            ));
        }
        Ok(())
    }

    fn take_visible(
        &self,
        max: usize,
        visibility: Duration,
        names: Option<&[String]>,
    ) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let sent_at = Utc::now().timestamp_millis().to_string();
        let mut messages = self.messages.lock();

        messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max)
            .map(|m| {
                let receipt_handle = Uuid::now_v7().to_string();
                m.receive_count += 1;
                m.receipt_handle = Some(receipt_handle.clone());
                m.visible_at = now + visibility;

                let mut attributes = m.attributes.clone();
                attributes.insert(
                    RECEIVE_COUNT_ATTRIBUTE.to_string(),
                    m.receive_count.to_string(),
                );
                attributes
                    .entry(SENT_TIMESTAMP_ATTRIBUTE.to_string())
                    .or_insert_with(|| sent_at.clone());
                if let Some(names) = names {
                    attributes.retain(|key, _| names.contains(key));
                }

                ReceivedMessage {
                    message_id: m.message_id.clone(),
                    receipt_handle,
                    body: m.body.clone(),
                    attributes,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Receiver for InMemoryQueue {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<ReceivedMessage>, TransportError> {
        self.check_queue(&request.queue_url)?;

        if let Some(error) = self.fetch_errors.lock().pop_front() {
            return Err(error);
        }

        let max = request
            .max_messages
            .unwrap_or(1)
            .clamp(1, MAX_MESSAGES_PER_FETCH) as usize;
        let visibility = Duration::from_secs(u64::from(
            request
                .visibility_timeout_seconds
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SECONDS),
        ));
        let deadline =
            Instant::now() + Duration::from_secs(u64::from(request.wait_time_seconds.unwrap_or(0)));
        let names = request.attribute_names.as_deref();

        loop {
            let arrived = self.arrivals.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let batch = self.take_visible(max, visibility, names);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(self.take_visible(max, visibility, names));
            }
        }
    }

    async fn acknowledge(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), TransportError> {
        self.check_queue(queue_url)?;

        let mut messages = self.messages.lock();
        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                TransportError::service("ReceiptHandleIsInvalid", "receipt handle is not valid")
            })?;
        messages.remove(position);
        Ok(())
    }

    async fn extend_lease(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<(), TransportError> {
        self.check_queue(queue_url)?;

        if visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(TransportError::service(
                "InvalidParameterValue",
                format!(
                    "visibility timeout must be at most {} seconds",
                    MAX_VISIBILITY_TIMEOUT_SECONDS
                ),
            ));
        }

        let now = Instant::now();
        let mut messages = self.messages.lock();
        let message = messages
            .iter_mut()
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                TransportError::service("ReceiptHandleIsInvalid", "receipt handle is not valid")
            })?;

        if message.visible_at <= now {
            return Err(TransportError::service(
                "MessageNotInflight",
                "message lease has already expired",
            ));
        }

        message.visible_at = now + Duration::from_secs(u64::from(visibility_timeout_seconds));
        Ok(())
    }
}

/// A message accepted by an [`InMemoryTopic`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub message_id: String,
    pub message: String,
    pub message_group_id: Option<String>,
}

/// In-memory topic implementing [`Sender`]
///
/// Batches follow the managed service's rules: at most
/// [`MAX_BATCH_SIZE`] distinct entries per call, and on FIFO topics every
/// entry needs a group id. Oversized messages are rejected per entry.
pub struct InMemoryTopic {
    topic_arn: String,
    max_message_bytes: usize,
    published: Mutex<Vec<PublishedMessage>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl InMemoryTopic {
    /// Create an empty topic reachable under `topic_arn`
    pub fn new(topic_arn: impl Into<String>) -> Self {
        Self {
            topic_arn: topic_arn.into(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            published: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Set the maximum accepted message size in bytes
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Every message accepted so far, in acceptance order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Entry counts of every batch call that reached the topic
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    fn check_topic(&self, topic_arn: &str) -> Result<(), TransportError> {
        if topic_arn != self.topic_arn {
            return Err(TransportError::service(
                "NotFound",
                format!("topic does not exist: {}", topic_arn),
            ));
        }
        Ok(())
    }

    /// Validate a single message, returning the rejection code and reason
    fn validate(&self, message: &str, group_id: Option<&str>) -> Option<(&'static str, String)> {
        if message.len() > self.max_message_bytes {
            return Some((
                "InvalidParameter",
                format!(
                    "message must be shorter than {} bytes",
                    self.max_message_bytes
                ),
            ));
        }
        if is_fifo_topic(&self.topic_arn) && group_id.is_none() {
            return Some((
                "InvalidParameter",
                "the request must contain the parameter MessageGroupId".to_string(),
            ));
        }
        None
    }

    fn accept(&self, message: String, message_group_id: Option<String>) -> String {
        let message_id = Uuid::now_v7().to_string();
        self.published.lock().push(PublishedMessage {
            message_id: message_id.clone(),
            message,
            message_group_id,
        });
        message_id
    }
}

#[async_trait]
impl Sender for InMemoryTopic {
    async fn publish_one(&self, request: PublishRequest) -> Result<(), TransportError> {
        self.check_topic(&request.topic_arn)?;

        if let Some((code, reason)) =
            self.validate(&request.message, request.message_group_id.as_deref())
        {
            return Err(TransportError::service(code, reason));
        }

        self.accept(request.message, request.message_group_id);
        Ok(())
    }

    async fn publish_many(
        &self,
        topic_arn: &str,
        entries: Vec<PublishBatchEntry>,
    ) -> Result<PublishBatchOutput, TransportError> {
        self.check_topic(topic_arn)?;

        if entries.is_empty() {
            return Err(TransportError::service(
                "EmptyBatchRequest",
                "the batch request does not contain any entries",
            ));
        }
        if entries.len() > MAX_BATCH_SIZE {
            return Err(TransportError::service(
                "TooManyEntriesInBatchRequest",
                format!("the batch request contains more than {} entries", MAX_BATCH_SIZE),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if !entries.iter().all(|e| seen.insert(e.id.as_str())) {
            return Err(TransportError::service(
                "BatchEntryIdsNotDistinct",
                "two or more batch entries in the request have the same id",
            ));
        }

        self.batch_sizes.lock().push(entries.len());

        let mut output = PublishBatchOutput::default();
        for entry in entries {
            match self.validate(&entry.message, entry.message_group_id.as_deref()) {
                Some((code, reason)) => output.failed.push(FailedEntry {
                    id: entry.id,
                    code: Some(code.to_string()),
                    message: Some(reason),
                    sender_fault: true,
                }),
                None => {
                    let message_id = self.accept(entry.message, entry.message_group_id);
                    output.successful.push(SucceededEntry {
                        id: entry.id,
                        message_id: Some(message_id),
                    });
                }
            }
        }

        Ok(output)
    }
}
