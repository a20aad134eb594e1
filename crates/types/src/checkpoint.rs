// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use crate::identifiers::{NodeIndex, TableId};
use crate::time::{MicrosSinceEpoch, MillisSinceEpoch};

/// Cursor up to which a node has synced its partition of a table. All rows of the partition
/// with a timestamp `<= last_synced` are in the sink.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub table_id: TableId,
    pub node_index: NodeIndex,
    pub last_synced: MicrosSinceEpoch,
    pub updated_at: MillisSinceEpoch,
}

impl Checkpoint {
    /// The checkpoint of a (table, node) pair that never synced anything.
    pub fn initial(table_id: TableId, node_index: NodeIndex) -> Self {
        Self {
            table_id,
            node_index,
            last_synced: MicrosSinceEpoch::UNIX_EPOCH,
            updated_at: MillisSinceEpoch::UNIX_EPOCH,
        }
    }

    /// Returns the checkpoint moved to `candidate`, or `None` if `candidate` would not move it
    /// forward.
    pub fn advanced_to(&self, candidate: MicrosSinceEpoch) -> Option<Self> {
        (candidate > self.last_synced).then(|| Self {
            table_id: self.table_id.clone(),
            node_index: self.node_index,
            last_synced: candidate,
            updated_at: MillisSinceEpoch::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_moves_backwards() {
        let initial = Checkpoint::initial("positions".into(), NodeIndex::new(0));
        let advanced = initial
            .advanced_to(MicrosSinceEpoch::new(100))
            .expect("moves forward");

        assert_eq!(advanced.last_synced, MicrosSinceEpoch::new(100));
        assert!(advanced.advanced_to(MicrosSinceEpoch::new(50)).is_none());
        assert!(advanced.advanced_to(MicrosSinceEpoch::new(100)).is_none());
    }
}
