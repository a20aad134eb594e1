// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use bytes::{Buf, BufMut, BytesMut};

use shardsync_types::identifiers::{NodeIndex, TableId};
use shardsync_types::time::MicrosSinceEpoch;

pub(crate) const CHECKPOINTS_CF: &str = "checkpoints";

const TABLE_CF_PREFIX: &str = "table-";
const INDEX_CF_PREFIX: &str = "index-";

const SIGN_BIT: u64 = 1 << 63;

/// Column family holding the records of a sink table, keyed by record id.
pub(crate) fn table_cf(table: &str) -> String {
    format!("{TABLE_CF_PREFIX}{table}")
}

/// Column family holding the timestamp index of a sink table.
pub(crate) fn index_cf(table: &str) -> String {
    format!("{INDEX_CF_PREFIX}{table}")
}

// Flipping the sign bit maps i64 onto u64 monotonically, so big-endian keys sort by time
// including pre-epoch timestamps.
fn encode_timestamp(timestamp: MicrosSinceEpoch) -> u64 {
    (timestamp.as_i64() as u64) ^ SIGN_BIT
}

fn decode_timestamp(encoded: u64) -> MicrosSinceEpoch {
    MicrosSinceEpoch::new((encoded ^ SIGN_BIT) as i64)
}

/// `<timestamp (8 bytes, big-endian)><id>`. Index keys sort by timestamp, then by id.
pub(crate) fn index_key(timestamp: MicrosSinceEpoch, id: &str) -> BytesMut {
    let mut key = BytesMut::with_capacity(8 + id.len());
    key.put_u64(encode_timestamp(timestamp));
    key.put_slice(id.as_bytes());
    key
}

/// Smallest index key of the given timestamp.
pub(crate) fn index_prefix(timestamp: MicrosSinceEpoch) -> [u8; 8] {
    encode_timestamp(timestamp).to_be_bytes()
}

pub(crate) fn decode_index_key(mut key: &[u8]) -> Option<(MicrosSinceEpoch, &str)> {
    if key.len() < 8 {
        return None;
    }
    let timestamp = decode_timestamp(key.get_u64());
    std::str::from_utf8(key).ok().map(|id| (timestamp, id))
}

/// `<table id>/<node index>`, the node index zero padded so keys of a table sort by node.
pub(crate) fn checkpoint_key(table_id: &TableId, node_index: NodeIndex) -> Vec<u8> {
    format!("{table_id}/{:010}", u32::from(node_index)).into_bytes()
}
