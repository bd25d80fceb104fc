//! Client for the relay HTTP API
//!
//! Transport failures, timeouts and 5xx answers are retried with
//! exponential backoff. Relay rejections come back as [`ClientError::Api`]
//! carrying the relay's [`ErrorKind`](crate::service::ErrorKind).

pub mod client;
pub mod error;
pub mod retry;

pub use client::ServiceClient;
pub use error::ClientError;
pub use retry::RetryPolicy;
