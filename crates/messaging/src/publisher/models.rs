//! Batch publish request and result types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::transport::{FailedEntry, TransportError};

/// Message returned for rejected entries the service did not describe
pub const GENERIC_PUBLISH_ERROR: &str = "failed to publish message";

/// One message of a batch publish call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMessage<T> {
    /// Caller-supplied id, unique within the call; used to correlate results
    pub id: String,
    pub data: T,
}

impl<T> BatchMessage<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// An entry the topic refused while accepting the rest of its batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RejectedEntry {
    pub code: Option<String>,
    pub message: String,
    /// Whether the service blamed the request rather than itself
    pub sender_fault: bool,
}

impl From<FailedEntry> for RejectedEntry {
    fn from(entry: FailedEntry) -> Self {
        Self {
            code: entry.code,
            message: entry
                .message
                .unwrap_or_else(|| GENERIC_PUBLISH_ERROR.to_string()),
            sender_fault: entry.sender_fault,
        }
    }
}

/// Per-message results of a batch publish call
///
/// `results` maps each attempted id to `None` when published or to the
/// rejection reason otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPublishOutcome {
    pub results: HashMap<String, Option<RejectedEntry>>,
    pub success_count: u64,
    pub error_count: u64,
}

impl BatchPublishOutcome {
    /// True when every attempted message was published
    pub fn is_complete_success(&self) -> bool {
        self.error_count == 0
    }

    /// Rejected ids with their reasons
    pub fn rejected(&self) -> impl Iterator<Item = (&str, &RejectedEntry)> {
        self.results
            .iter()
            .filter_map(|(id, result)| result.as_ref().map(|r| (id.as_str(), r)))
    }

    pub(crate) fn record_success(&mut self, id: String) {
        self.results.insert(id, None);
        self.success_count += 1;
    }

    pub(crate) fn record_failure(&mut self, id: String, rejection: RejectedEntry) {
        self.results.insert(id, Some(rejection));
        self.error_count += 1;
    }
}

/// Publish errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The message could not be serialized to JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The publish call itself failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A batch publish call aborted part-way
///
/// `partial` holds the results of the chunks submitted before the failure.
/// Messages after those chunks were never sent and must be resubmitted by
/// the caller.
#[derive(Debug, thiserror::Error)]
#[error(
    "batch publish aborted ({} published, {} rejected): {source}",
    .partial.success_count,
    .partial.error_count
)]
pub struct BatchPublishError {
    pub partial: BatchPublishOutcome,
    #[source]
    pub source: PublishError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_falls_back_to_generic_message() {
        let rejection = RejectedEntry::from(FailedEntry {
            id: "1".to_string(),
            code: Some("InternalError".to_string()),
            message: None,
            sender_fault: false,
        });

        assert_eq!(rejection.message, GENERIC_PUBLISH_ERROR);
        assert_eq!(rejection.to_string(), GENERIC_PUBLISH_ERROR);
        assert_eq!(rejection.code.as_deref(), Some("InternalError"));
    }

    #[test]
    fn test_outcome_counts() {
        let mut outcome = BatchPublishOutcome::default();
        assert!(outcome.is_complete_success());

        outcome.record_success("a".to_string());
        outcome.record_failure(
            "b".to_string(),
            RejectedEntry {
                code: None,
                message: "too big".to_string(),
                sender_fault: true,
            },
        );

        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.error_count, 1);
        assert!(!outcome.is_complete_success());

        let rejected: Vec<_> = outcome.rejected().collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "b");
        assert_eq!(rejected[0].1.message, "too big");
    }

    #[test]
    fn test_batch_error_display() {
        let mut partial = BatchPublishOutcome::default();
        partial.record_success("a".to_string());

        let err = BatchPublishError {
            partial,
            source: TransportError::Network("connection reset".to_string()).into(),
        };

        assert_eq!(
            err.to_string(),
            "batch publish aborted (1 published, 0 rejected): transport error: network error: connection reset"
        );
    }
}
