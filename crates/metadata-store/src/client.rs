// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use bytes::Bytes;
use bytestring::ByteString;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use shardsync_types::errors::{GenericError, MaybeRetryableError};
use shardsync_types::retries::RetryPolicy;
use shardsync_types::{Version, Versioned};

use crate::{MetadataStore, Precondition, ReadError, VersionedValue, WriteError};

/// Stores [`Versioned`] values as json documents in a [`MetadataStore`].
#[derive(Clone)]
pub struct MetadataStoreClient {
    inner: Arc<dyn MetadataStore + Send + Sync>,
    backoff_policy: Option<RetryPolicy>,
}

impl MetadataStoreClient {
    pub fn new<S>(metadata_store: S, backoff_policy: Option<RetryPolicy>) -> Self
    where
        S: MetadataStore + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(metadata_store),
            backoff_policy,
        }
    }

    pub fn new_in_memory() -> Self {
        MetadataStoreClient::new(crate::InMemoryMetadataStore::default(), None)
    }

    /// Gets the value and its current version for the given key. If key-value pair is not present,
    /// then return [`None`].
    pub async fn get<T: Versioned + DeserializeOwned>(
        &self,
        key: ByteString,
    ) -> Result<Option<T>, ReadError> {
        let value = self.retry_read(|| self.inner.get(key.clone())).await?;
        value.map(decode::<T>).transpose()
    }

    /// Puts the versioned value under the given key following the provided precondition. If the
    /// precondition is not met, then the operation returns a [`WriteError::FailedPrecondition`].
    pub async fn put<T>(
        &self,
        key: ByteString,
        value: &T,
        precondition: Precondition,
    ) -> Result<(), WriteError>
    where
        T: Versioned + Serialize,
    {
        let buf = serde_json::to_vec(value).map_err(|err| WriteError::Codec(err.into()))?;
        let versioned_value = VersionedValue::new(value.version(), Bytes::from(buf));

        let retry_policy = self.backoff_policy.clone().unwrap_or_default();
        retry_policy
            .retry_if(
                || {
                    self.inner
                        .put(key.clone(), versioned_value.clone(), precondition)
                },
                |err: &WriteError| err.retryable(),
            )
            .await
    }

    /// Gets the value under the specified key or inserts a new value if it is not present into the
    /// metadata store.
    ///
    /// This method won't overwrite an existing value that is stored in the metadata store.
    pub async fn get_or_insert<T, F>(
        &self,
        key: ByteString,
        mut init: F,
    ) -> Result<T, ReadWriteError>
    where
        T: Versioned + Serialize + DeserializeOwned,
        F: FnMut() -> T,
    {
        let mut backoff_policy = self.backoff_policy.as_ref().map(|p| p.iter());

        loop {
            if let Some(value) = self.get::<T>(key.clone()).await? {
                return Ok(value);
            }

            let init_value = init();
            match self
                .put(key.clone(), &init_value, Precondition::DoesNotExist)
                .await
            {
                Ok(()) => return Ok(init_value),
                Err(WriteError::FailedPrecondition(msg)) => {
                    if let Some(backoff) = backoff_policy.as_mut().and_then(|p| p.next()) {
                        debug!(
                            "Concurrent value update: {msg}; retrying in '{}'",
                            humantime::format_duration(backoff)
                        );
                        tokio::time::sleep(backoff).await;
                    } else {
                        return Err(ReadWriteError::RetriesExhausted(key));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reads the value under the given key, modifies it and writes the result back. The write
    /// only succeeds if the stored value has not been modified in the meantime, otherwise the
    /// read-modify-write cycle is retried.
    pub async fn read_modify_write<T, F, E>(
        &self,
        key: ByteString,
        mut modify: F,
    ) -> Result<T, ReadModifyWriteError<E>>
    where
        T: Versioned + Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> Result<T, E>,
    {
        let mut backoff_policy = self.backoff_policy.as_ref().map(|p| p.iter());

        loop {
            let old_value = self
                .get::<T>(key.clone())
                .await
                .map_err(ReadWriteError::from)?;

            let precondition = old_value
                .as_ref()
                .map(|c| Precondition::MatchesVersion(c.version()))
                .unwrap_or(Precondition::DoesNotExist);

            let new_value = modify(old_value).map_err(ReadModifyWriteError::FailedOperation)?;

            match self.put(key.clone(), &new_value, precondition).await {
                Ok(()) => return Ok(new_value),
                Err(WriteError::FailedPrecondition(msg)) => {
                    if let Some(backoff) = backoff_policy.as_mut().and_then(|p| p.next()) {
                        debug!(
                            "Concurrent value update: {msg}; retrying in '{}'",
                            humantime::format_duration(backoff)
                        );
                        tokio::time::sleep(backoff).await;
                    } else {
                        return Err(ReadWriteError::RetriesExhausted(key).into());
                    }
                }
                Err(err) => return Err(ReadModifyWriteError::ReadWrite(err.into())),
            }
        }
    }

    /// Subscribes to decoded values of the given key. See [`MetadataStore::watch`].
    pub async fn watch<T>(
        &self,
        key: ByteString,
    ) -> Result<BoxStream<'static, Result<T, ReadError>>, ReadError>
    where
        T: Versioned + DeserializeOwned + Send + 'static,
    {
        let stream = self.inner.watch(key).await?;
        Ok(stream
            .map(|item| item.and_then(decode::<T>))
            .boxed())
    }

    async fn retry_read<T, F, Fut>(&self, operation: F) -> Result<T, ReadError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ReadError>>,
    {
        self.backoff_policy
            .clone()
            .unwrap_or_default()
            .retry_if(operation, |err: &ReadError| err.retryable())
            .await
    }
}

fn decode<T: Versioned + DeserializeOwned>(versioned_value: VersionedValue) -> Result<T, ReadError> {
    let value: T = serde_json::from_slice(&versioned_value.value)
        .map_err(|err| ReadError::Codec(err.into()))?;

    if value.version() != versioned_value.version {
        return Err(ReadError::Codec(
            format!(
                "stored version {} does not match the version {} of the decoded value",
                versioned_value.version,
                value.version()
            )
            .into(),
        ));
    }

    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ReadWriteError {
    #[error("codec error: {0}")]
    Codec(GenericError),
    #[error(transparent)]
    Read(ReadError),
    #[error(transparent)]
    Write(WriteError),
    #[error("retries for operation on key '{0}' exhausted")]
    RetriesExhausted(ByteString),
}

impl MaybeRetryableError for ReadWriteError {
    fn retryable(&self) -> bool {
        match self {
            ReadWriteError::Read(err) => err.retryable(),
            ReadWriteError::Write(err) => err.retryable(),
            ReadWriteError::Codec(_) => false,
            ReadWriteError::RetriesExhausted(_) => true,
        }
    }
}

impl From<ReadError> for ReadWriteError {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::Codec(err) => ReadWriteError::Codec(err),
            err => ReadWriteError::Read(err),
        }
    }
}

impl From<WriteError> for ReadWriteError {
    fn from(value: WriteError) -> Self {
        match value {
            WriteError::Codec(err) => ReadWriteError::Codec(err),
            err => ReadWriteError::Write(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadModifyWriteError<E = String> {
    #[error(transparent)]
    ReadWrite(#[from] ReadWriteError),
    #[error("failed read-modify-write operation: {0}")]
    FailedOperation(E),
}

static_assertions::assert_impl_all!(MetadataStoreClient: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Counter {
        version: Version,
        value: u64,
    }

    impl Versioned for Counter {
        fn version(&self) -> Version {
            self.version
        }
    }

    const KEY: ByteString = ByteString::from_static("counter");

    #[test_log::test(tokio::test)]
    async fn get_or_insert_keeps_existing_value() -> googletest::Result<()> {
        let client = MetadataStoreClient::new_in_memory();

        let first = client
            .get_or_insert(KEY, || Counter {
                version: Version::MIN,
                value: 1,
            })
            .await?;
        let second = client
            .get_or_insert(KEY, || Counter {
                version: Version::MIN,
                value: 2,
            })
            .await?;

        assert_that!(first.value, eq(1));
        assert_that!(second, eq(first));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn read_modify_write_increments_version() -> googletest::Result<()> {
        let client = MetadataStoreClient::new_in_memory();

        for _ in 0..3 {
            client
                .read_modify_write(KEY, |current: Option<Counter>| {
                    let next = match current {
                        Some(c) => Counter {
                            version: c.version.next(),
                            value: c.value + 1,
                        },
                        None => Counter {
                            version: Version::MIN,
                            value: 0,
                        },
                    };
                    Ok::<_, String>(next)
                })
                .await?;
        }

        let stored = client.get::<Counter>(KEY).await?;
        assert_that!(
            stored,
            some(eq(Counter {
                version: Version::from(2),
                value: 2
            }))
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn failed_modification_writes_nothing() -> googletest::Result<()> {
        let client = MetadataStoreClient::new_in_memory();

        let result = client
            .read_modify_write(KEY, |_: Option<Counter>| Err("rejected".to_owned()))
            .await;

        assert!(matches!(
            result,
            Err(ReadModifyWriteError::FailedOperation(ref msg)) if msg == "rejected"
        ));
        assert!(client.get::<Counter>(KEY).await?.is_none());
        Ok(())
    }
}
