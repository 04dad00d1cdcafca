//! Topic publishing
//!
//! This module provides:
//! - [`TopicPublisher`] - Single and batched JSON publishing to a topic
//! - [`BatchPublishOutcome`] - Per-message results of a batch call
//! - [`BatchPublishError`] - Fatal batch failure carrying partial results

mod models;
mod topic;

pub use models::{
    BatchMessage, BatchPublishError, BatchPublishOutcome, PublishError, RejectedEntry,
    GENERIC_PUBLISH_ERROR,
};
pub use topic::{
    is_fifo_topic, PublisherConfig, TopicPublisher, DEFAULT_MESSAGE_GROUP_ID, MAX_BATCH_SIZE,
};
