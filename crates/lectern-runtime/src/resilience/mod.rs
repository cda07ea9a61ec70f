//! Resilience patterns for lectern-runtime.
//!
//! This module provides:
//! - Circuit breaker to stop calling an unhealthy backend
//! - Retry with exponential backoff for transient failures

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitStatus};
pub use retry::{with_retry, RetryPolicy, RetryableError};
