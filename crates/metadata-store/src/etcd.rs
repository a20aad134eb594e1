// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use anyhow::Context;
use async_trait::async_trait;
use bytestring::ByteString;
use etcd_client::{
    Client, Compare, CompareOp, EventType, KeyValue, KvClient, Txn, TxnOp, WatchOptions,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::{
    check_precondition, MetadataStore, Precondition, ReadError, VersionedValue, WatchStream,
    WriteError,
};

impl From<etcd_client::Error> for ReadError {
    fn from(value: etcd_client::Error) -> Self {
        ReadError::retryable(value)
    }
}

impl From<etcd_client::Error> for WriteError {
    fn from(value: etcd_client::Error) -> Self {
        WriteError::retryable(value)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("etcd watch stream for '{0}' was closed")]
struct WatchClosed(ByteString);

fn key_bytes(key: &ByteString) -> Vec<u8> {
    key.as_bytes().to_vec()
}

// Values are stored as json encoded `VersionedValue`, so the version is the one chosen by the
// writer and not etcd's per-key counter. Compare-and-swap is expressed on etcd's mod revision
// of the key, which changes with every write.
fn decode(kv: &KeyValue) -> Result<VersionedValue, ReadError> {
    serde_json::from_slice(kv.value()).map_err(|err| ReadError::Codec(err.into()))
}

/// Metadata store backed by an etcd cluster.
pub struct EtcdMetadataStore {
    client: Client,
}

impl EtcdMetadataStore {
    pub async fn new<S: AsRef<[A]>, A: AsRef<str>>(addresses: S) -> anyhow::Result<Self> {
        let client = Client::connect(addresses, None)
            .await
            .context("failed to connect to etcd cluster")?;

        Ok(Self { client })
    }

    async fn get_kv(
        &self,
        client: &mut KvClient,
        key: &ByteString,
    ) -> Result<(Option<KeyValue>, i64), ReadError> {
        let mut response = client.get(key_bytes(key), None).await?;
        let revision = response.header().map(|h| h.revision()).unwrap_or_default();
        Ok((response.take_kvs().into_iter().next(), revision))
    }

    /// Runs `put` only if the key was not modified since `mod_revision` (0 if it did not exist).
    async fn put_if_unmodified(
        &self,
        client: &mut KvClient,
        key: &ByteString,
        value: Vec<u8>,
        mod_revision: i64,
    ) -> Result<bool, WriteError> {
        let txn = Txn::new()
            .when(vec![Compare::mod_revision(
                key_bytes(key),
                CompareOp::Equal,
                mod_revision,
            )])
            .and_then(vec![TxnOp::put(key_bytes(key), value, None)]);

        Ok(client.txn(txn).await?.succeeded())
    }
}

#[async_trait]
impl MetadataStore for EtcdMetadataStore {
    async fn get(&self, key: ByteString) -> Result<Option<VersionedValue>, ReadError> {
        let mut client = self.client.kv_client();
        let (kv, _) = self.get_kv(&mut client, &key).await?;
        kv.as_ref().map(decode).transpose()
    }

    async fn put(
        &self,
        key: ByteString,
        value: VersionedValue,
        precondition: Precondition,
    ) -> Result<(), WriteError> {
        let mut client = self.client.kv_client();
        let encoded = serde_json::to_vec(&value).map_err(|err| WriteError::Codec(err.into()))?;

        if precondition == Precondition::None {
            client.put(key_bytes(&key), encoded, None).await?;
            return Ok(());
        }

        let (kv, _) = self
            .get_kv(&mut client, &key)
            .await
            .map_err(|err| WriteError::Other(Box::new(err)))?;
        let current = kv
            .as_ref()
            .map(decode)
            .transpose()
            .map_err(|err| WriteError::Codec(err.into()))?;
        check_precondition(precondition, current.map(|v| v.version))?;

        let mod_revision = kv.map(|kv| kv.mod_revision()).unwrap_or(0);
        if !self
            .put_if_unmodified(&mut client, &key, encoded, mod_revision)
            .await?
        {
            return Err(WriteError::FailedPrecondition(format!(
                "key '{key}' was modified concurrently"
            )));
        }

        Ok(())
    }

    async fn watch(&self, key: ByteString) -> Result<WatchStream, ReadError> {
        let mut kv_client = self.client.kv_client();
        let (current, revision) = self.get_kv(&mut kv_client, &key).await?;

        let (mut watcher, mut stream) = self
            .client
            .watch_client()
            .watch(
                key_bytes(&key),
                Some(WatchOptions::new().with_start_revision(revision + 1)),
            )
            .await?;

        let (tx, rx) = mpsc::channel(16);
        if let Some(kv) = current {
            // fresh channel with spare capacity
            let _ = tx.try_send(decode(&kv));
        }

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => break,
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(response)) => {
                        for event in response.events() {
                            if !matches!(event.event_type(), EventType::Put) {
                                continue;
                            }
                            let Some(kv) = event.kv() else {
                                continue;
                            };
                            trace!(key = %key, mod_revision = kv.mod_revision(), "observed write");
                            if tx.send(decode(kv)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        let _ = tx.send(Err(err.into())).await;
                        break;
                    }
                    None => {
                        let _ = tx
                            .send(Err(ReadError::retryable(WatchClosed(key.clone()))))
                            .await;
                        break;
                    }
                }
            }
            debug!(key = %key, "etcd watch ended");
            let _ = watcher.cancel().await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
