// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Linearizable, versioned key-value storage shared by all nodes of a cluster, plus change
//! subscriptions on individual keys.

mod client;
mod etcd;
mod memory;

pub use client::{MetadataStoreClient, ReadModifyWriteError, ReadWriteError};
pub use etcd::EtcdMetadataStore;
pub use memory::InMemoryMetadataStore;

use async_trait::async_trait;
use bytes::Bytes;
use bytestring::ByteString;
use futures::stream::BoxStream;

use shardsync_types::errors::{
    BoxedMaybeRetryableError, GenericError, IntoMaybeRetryable, MaybeRetryableError,
};
use shardsync_types::Version;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("codec error: {0}")]
    Codec(GenericError),
    #[error("other error: {0}")]
    Other(BoxedMaybeRetryableError),
}

impl ReadError {
    pub fn retryable<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Other(Box::new(error.into_retryable()))
    }

    pub fn terminal<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Other(Box::new(error.into_terminal()))
    }
}

impl MaybeRetryableError for ReadError {
    fn retryable(&self) -> bool {
        match self {
            ReadError::Other(err) => err.retryable(),
            ReadError::Codec(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("other error: {0}")]
    Other(BoxedMaybeRetryableError),
    #[error("codec error: {0}")]
    Codec(GenericError),
}

impl WriteError {
    pub fn retryable<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Other(Box::new(error.into_retryable()))
    }

    pub fn terminal<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Other(Box::new(error.into_terminal()))
    }
}

impl MaybeRetryableError for WriteError {
    fn retryable(&self) -> bool {
        match self {
            WriteError::Other(err) => err.retryable(),
            WriteError::Codec(_) | WriteError::FailedPrecondition(_) => false,
        }
    }
}

/// An encoded value together with the version it was written with.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VersionedValue {
    pub version: Version,
    pub value: Bytes,
}

impl VersionedValue {
    pub fn new(version: Version, value: Bytes) -> Self {
        Self { version, value }
    }
}

/// Preconditions for the write operations of the [`MetadataStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No precondition
    None,
    /// Key-value pair must not exist for the write operation to succeed.
    DoesNotExist,
    /// Key-value pair must have the provided [`Version`] for the write operation to succeed.
    MatchesVersion(Version),
}

/// Stream of the values written under a watched key.
pub type WatchStream = BoxStream<'static, Result<VersionedValue, ReadError>>;

/// Metadata store abstraction. Implementations need to support linearizable reads, atomic
/// compare and swap writes and per-key change notifications.
#[async_trait]
pub trait MetadataStore {
    /// Gets the value and its current version for the given key. If key-value pair is not present,
    /// then return [`None`].
    async fn get(&self, key: ByteString) -> Result<Option<VersionedValue>, ReadError>;

    /// Puts the versioned value under the given key following the provided precondition. If the
    /// precondition is not met, then the operation returns a [`WriteError::FailedPrecondition`].
    async fn put(
        &self,
        key: ByteString,
        value: VersionedValue,
        precondition: Precondition,
    ) -> Result<(), WriteError>;

    /// Subscribes to the given key. The stream yields the value stored at subscription time
    /// (if any) followed by every subsequent write, in write order. An `Err` item or the end of
    /// the stream means the subscription is broken and has to be re-established.
    async fn watch(&self, key: ByteString) -> Result<WatchStream, ReadError>;
}

static_assertions::assert_obj_safe!(MetadataStore);

/// Checks a precondition against the version currently stored, shared by the implementations.
pub(crate) fn check_precondition(
    precondition: Precondition,
    current: Option<Version>,
) -> Result<(), WriteError> {
    match (precondition, current) {
        (Precondition::None, _) => Ok(()),
        (Precondition::DoesNotExist, None) => Ok(()),
        (Precondition::DoesNotExist, Some(version)) => Err(WriteError::FailedPrecondition(
            format!("key-value pair already exists with version {version}"),
        )),
        (Precondition::MatchesVersion(expected), Some(version)) if expected == version => Ok(()),
        (Precondition::MatchesVersion(expected), current) => {
            Err(WriteError::FailedPrecondition(format!(
                "expected version {expected} but found {}",
                current.map_or_else(|| "none".to_owned(), |v| v.to_string())
            )))
        }
    }
}
