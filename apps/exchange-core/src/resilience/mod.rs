//! Resilience Module
//! Retry with backoff for infrastructure calls

mod retry;

pub use retry::{with_retry_async, RetryConfig};
