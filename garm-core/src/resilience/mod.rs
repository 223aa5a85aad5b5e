//! Retry and backoff primitives

pub mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};
