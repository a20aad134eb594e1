// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Node local sink backed by RocksDB. Every sink table owns two column families: the json
//! encoded records keyed by id, and a timestamp index keyed by `<timestamp><id>` that serves
//! range searches and retention. Checkpoints share one dedicated column family.

mod checkpoint;
mod keys;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, DBCompressionType, MultiThreaded};
use tracing::{debug, info};

use shardsync_storage_api::{Result, SinkError};
use shardsync_types::config::SinkOptions;
use shardsync_types::errors::ShutdownError;

pub type DB = rocksdb::DBWithThreadMode<MultiThreaded>;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to create sink directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    RocksDb(#[from] rocksdb::Error),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

fn db_options() -> rocksdb::Options {
    let mut db_options = rocksdb::Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);
    // no need to retain 1000 log files by default.
    db_options.set_keep_log_file_num(1);

    db_options
}

fn cf_options() -> rocksdb::Options {
    let mut cf_options = rocksdb::Options::default();
    cf_options.set_max_write_buffer_number(3);
    cf_options.set_num_levels(7);
    cf_options.set_compression_per_level(&[
        DBCompressionType::None,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Zstd,
    ]);

    cf_options
}

#[derive(Clone)]
pub struct RocksDbSink {
    db: Arc<DB>,
    disable_wal: bool,
    // serializes checkpoint read-modify-writes
    checkpoint_lock: Arc<Mutex<()>>,
    // serializes record writes, which read the replaced record to maintain the index
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for RocksDbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbSink")
            .field("path", &self.db.path())
            .field("disable_wal", &self.disable_wal)
            .finish()
    }
}

impl RocksDbSink {
    /// Opens (or creates) the sink below the configured data directory, re-opening every
    /// column family created by earlier runs.
    pub async fn open(options: &SinkOptions, base_dir: &Path) -> Result<Self, BuildError> {
        let path = options.data_dir(base_dir);
        let disable_wal = options.rocksdb_disable_wal;

        let db = tokio::task::spawn_blocking(move || Self::open_db(path))
            .await
            .map_err(|_| ShutdownError)??;

        Ok(Self {
            db: Arc::new(db),
            disable_wal,
            checkpoint_lock: Arc::default(),
            write_lock: Arc::default(),
        })
    }

    fn open_db(path: PathBuf) -> Result<DB, BuildError> {
        std::fs::create_dir_all(&path).map_err(|source| BuildError::CreateDir {
            path: path.clone(),
            source,
        })?;

        let mut cf_names = DB::list_cf(&rocksdb::Options::default(), &path)
            .unwrap_or_else(|_| vec![rocksdb::DEFAULT_COLUMN_FAMILY_NAME.to_owned()]);
        if !cf_names.iter().any(|name| name == keys::CHECKPOINTS_CF) {
            cf_names.push(keys::CHECKPOINTS_CF.to_owned());
        }
        debug!(?cf_names, "Opening sink at {}", path.display());

        let descriptors = cf_names
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, cf_options()));
        let db = DB::open_cf_descriptors(&db_options(), &path, descriptors)?;
        info!("Sink opened at {}", path.display());
        Ok(db)
    }

    fn write_options(&self) -> rocksdb::WriteOptions {
        let mut write_options = rocksdb::WriteOptions::default();
        write_options.disable_wal(self.disable_wal);
        write_options
    }

    /// Runs blocking rocksdb work off the async runtime.
    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|err| SinkError::Storage(err.into()))?
    }
}

fn storage_error(err: rocksdb::Error) -> SinkError {
    SinkError::Storage(err.into())
}

fn codec_error(err: serde_json::Error) -> SinkError {
    SinkError::Codec(err.into())
}
