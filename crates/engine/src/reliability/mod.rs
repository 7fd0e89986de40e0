//! Reliability patterns for job execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Bounded retries with linear or exponential backoff

mod retry;

pub use retry::{BackoffStrategy, RetryPolicy};
