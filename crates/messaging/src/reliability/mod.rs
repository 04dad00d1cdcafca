//! Reliability patterns for queue consumption
//!
//! This module provides:
//! - [`BackoffPolicy`] - Exponential backoff with floor, ceiling and jitter
//! - [`Backoff`] - Per-task counter advancing through a policy

mod backoff;

pub use backoff::{Backoff, BackoffPolicy};
