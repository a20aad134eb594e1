// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

/// Error type which abstracts away the actual [`std::error::Error`] type. Use this type
/// if you don't know the actual error type or if it is not important.
pub type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type BoxedMaybeRetryableError = Box<dyn MaybeRetryableError + Send + Sync>;

/// Classifies errors of remote calls into transient and permanent ones.
pub trait MaybeRetryableError: std::error::Error + 'static {
    /// Whether repeating the failed call may succeed.
    fn retryable(&self) -> bool {
        false
    }
}

static_assertions::assert_obj_safe!(MaybeRetryableError);

pub trait IntoMaybeRetryable: std::error::Error + Sized + 'static {
    fn into_retryable(self) -> RetryableError<Self> {
        RetryableError(self)
    }

    fn into_terminal(self) -> TerminalError<Self> {
        TerminalError(self)
    }
}

impl<T> IntoMaybeRetryable for T where T: std::error::Error + Send + Sync + 'static {}

/// Marks the wrapped error as transient.
#[derive(Debug, thiserror::Error, derive_more::Deref, derive_more::From)]
#[error("[retryable] {0}")]
pub struct RetryableError<T: std::error::Error + 'static>(#[source] T);

/// Marks the wrapped error as permanent.
#[derive(Debug, thiserror::Error, derive_more::Deref, derive_more::From)]
#[error("[terminal] {0}")]
pub struct TerminalError<T: std::error::Error + 'static>(#[source] T);

impl<T: std::error::Error + 'static> MaybeRetryableError for RetryableError<T> {
    fn retryable(&self) -> bool {
        true
    }
}

impl<T: std::error::Error + 'static> MaybeRetryableError for TerminalError<T> {}

/// Returned by components that were asked to stop while an operation was in flight.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("system is shutting down")]
pub struct ShutdownError;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct ConnectionReset;

    #[test]
    fn wrappers_classify_errors() {
        let retryable: BoxedMaybeRetryableError = Box::new(ConnectionReset.into_retryable());
        let terminal: BoxedMaybeRetryableError = Box::new(ConnectionReset.into_terminal());

        assert!(retryable.retryable());
        assert!(!terminal.retryable());
        assert_eq!(retryable.to_string(), "[retryable] connection reset");
        assert_eq!(terminal.to_string(), "[terminal] connection reset");
    }
}
