//! Response status and typed response values
//!
//! Every decode, parse and orchestrated exchange reports exactly one
//! [`ResponseStatus`] together with a value. When the status is not
//! [`ResponseStatus::Success`] the value is a placeholder (usually
//! `T::default()`), never a partial result.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a decode, parse or exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The value is valid
    Success,
    /// Generic or transport-level failure
    Error,
    /// Response shorter than the minimum expected
    Truncated,
    /// Response content failed prefix or format verification
    UnexpectedResponse,
    /// Nothing arrived before the deadline
    Timeout,
    /// The PCM answered with a general reject
    Refused,
    /// The exchange was abandoned through the cancellation signal
    Cancelled,
}

impl ResponseStatus {
    /// True for [`ResponseStatus::Success`]
    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
            ResponseStatus::Truncated => "truncated",
            ResponseStatus::UnexpectedResponse => "unexpected response",
            ResponseStatus::Timeout => "timeout",
            ResponseStatus::Refused => "refused",
            ResponseStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// A status paired with a value and the number of retries it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T> {
    /// Outcome
    pub status: ResponseStatus,
    /// Value, meaningful only on success
    pub value: T,
    /// Retries spent before this outcome
    pub retry_count: u32,
}

impl<T> Response<T> {
    /// Create a response with an explicit status
    pub fn new(status: ResponseStatus, value: T) -> Self {
        Self {
            status,
            value,
            retry_count: 0,
        }
    }

    /// Create a successful response
    pub fn success(value: T) -> Self {
        Self::new(ResponseStatus::Success, value)
    }

    /// Record how many retries were spent
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// True when the status is [`ResponseStatus::Success`]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Transform the value, keeping status and retry count
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            value: f(self.value),
            retry_count: self.retry_count,
        }
    }
}

impl<T: Default> Response<T> {
    /// Create a failed response carrying the placeholder value
    pub fn failure(status: ResponseStatus) -> Self {
        Self::new(status, T::default())
    }
}
