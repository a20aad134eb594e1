// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytestring::ByteString;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    check_precondition, MetadataStore, Precondition, ReadError, VersionedValue, WatchStream,
    WriteError,
};

type WatchSender = mpsc::UnboundedSender<Result<VersionedValue, ReadError>>;

#[derive(Debug, thiserror::Error)]
#[error("in-memory watch was interrupted")]
struct WatchInterrupted;

#[derive(Default)]
struct Inner {
    kv_pairs: HashMap<ByteString, VersionedValue>,
    watchers: HashMap<ByteString, Vec<WatchSender>>,
}

/// Process local metadata store. Clones share the same state, which lets tests hand the same
/// store to several simulated nodes.
#[derive(Default, Clone)]
pub struct InMemoryMetadataStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryMetadataStore {
    /// Breaks every open subscription with a retryable error.
    pub fn fail_watches(&self) {
        let mut inner = self.inner.lock();
        for (_, senders) in inner.watchers.drain() {
            for sender in senders {
                let _ = sender.send(Err(ReadError::retryable(WatchInterrupted)));
            }
        }
    }

    pub fn watcher_count(&self, key: &ByteString) -> usize {
        self.inner
            .lock()
            .watchers
            .get(key)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, key: ByteString) -> Result<Option<VersionedValue>, ReadError> {
        Ok(self.inner.lock().kv_pairs.get(&key).cloned())
    }

    async fn put(
        &self,
        key: ByteString,
        value: VersionedValue,
        precondition: Precondition,
    ) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        check_precondition(
            precondition,
            inner.kv_pairs.get(&key).map(|v| v.version),
        )?;

        if let Some(senders) = inner.watchers.get_mut(&key) {
            senders.retain(|sender| sender.send(Ok(value.clone())).is_ok());
        }
        inner.kv_pairs.insert(key, value);

        Ok(())
    }

    async fn watch(&self, key: ByteString) -> Result<WatchStream, ReadError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock();
        if let Some(current) = inner.kv_pairs.get(&key) {
            // receiver is alive, cannot fail
            let _ = tx.send(Ok(current.clone()));
        }
        inner.watchers.entry(key).or_default().push(tx);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::StreamExt;
    use googletest::prelude::*;

    use shardsync_types::errors::MaybeRetryableError;
    use shardsync_types::Version;

    use super::*;

    const KEY: ByteString = ByteString::from_static("key");

    fn value(version: u32) -> VersionedValue {
        VersionedValue::new(Version::from(version), Bytes::from(version.to_string()))
    }

    #[test_log::test(tokio::test)]
    async fn preconditions_are_enforced() -> googletest::Result<()> {
        let store = InMemoryMetadataStore::default();

        store.put(KEY, value(0), Precondition::DoesNotExist).await?;
        assert!(matches!(
            store.put(KEY, value(1), Precondition::DoesNotExist).await,
            Err(WriteError::FailedPrecondition(_))
        ));
        assert!(matches!(
            store
                .put(KEY, value(1), Precondition::MatchesVersion(Version::from(7)))
                .await,
            Err(WriteError::FailedPrecondition(_))
        ));
        store
            .put(KEY, value(1), Precondition::MatchesVersion(Version::MIN))
            .await?;

        assert_eq!(
            store.get(KEY).await?.map(|value| value.version),
            Some(Version::from(1))
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn watch_yields_current_value_then_updates() -> googletest::Result<()> {
        let store = InMemoryMetadataStore::default();
        store.put(KEY, value(0), Precondition::None).await?;

        let mut stream = store.watch(KEY).await?;
        store.put(KEY, value(1), Precondition::None).await?;

        let first = stream.next().await.expect("item")?;
        let second = stream.next().await.expect("item")?;
        assert_that!(first.version, eq(Version::from(0)));
        assert_that!(second.version, eq(Version::from(1)));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn failed_watches_report_retryable_error_and_end() -> googletest::Result<()> {
        let store = InMemoryMetadataStore::default();
        let mut stream = store.watch(KEY).await?;
        assert_that!(store.watcher_count(&KEY), eq(1));

        store.fail_watches();

        let err = stream.next().await.expect("item").expect_err("watch failed");
        assert!(err.retryable());
        assert!(stream.next().await.is_none());
        assert_that!(store.watcher_count(&KEY), eq(0));
        Ok(())
    }
}
