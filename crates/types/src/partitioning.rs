// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Deterministic assignment of source rows to cluster nodes.
//!
//! A row belongs to node `i` of a cluster of `N` nodes iff
//! `floor_mod(micros(timestamp), N) == i`. The modulo is the mathematical one: the result is
//! non-negative for every timestamp, including pre-epoch ones. The same formula is rendered
//! into the source query by [`PartitionPredicate::sql_condition`]; both sides have to agree
//! bit for bit, otherwise rows are silently dropped or synced twice.

use crate::identifiers::{InvalidNodeIdentity, NodeIdentity, NodeIndex};
use crate::time::MicrosSinceEpoch;

/// Returns the node owning rows with the given timestamp.
pub fn owner_of(timestamp: MicrosSinceEpoch, cluster_size: u32) -> NodeIndex {
    assert!(cluster_size > 0, "cluster size must be greater than zero");
    let owner = timestamp.as_i64().rem_euclid(i64::from(cluster_size));
    // rem_euclid keeps the result within [0, cluster_size)
    NodeIndex::new(owner as u32)
}

/// Membership test of rows in the partition of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPredicate {
    identity: NodeIdentity,
}

impl PartitionPredicate {
    pub fn new(node_index: u32, cluster_size: u32) -> Result<Self, InvalidNodeIdentity> {
        NodeIdentity::new(node_index, cluster_size).map(Self::for_node)
    }

    pub fn for_node(identity: NodeIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn contains(&self, timestamp: MicrosSinceEpoch) -> bool {
        owner_of(timestamp, self.identity.cluster_size()) == self.identity.node_index()
    }

    /// Renders the predicate as a GoogleSQL condition over the given (already quoted)
    /// timestamp column.
    ///
    /// `MOD` in GoogleSQL takes the sign of the dividend, hence the `MOD(MOD(x, n) + n, n)`
    /// normalization which yields the floor modulo for negative timestamps.
    pub fn sql_condition(&self, timestamp_column: &str) -> String {
        let n = self.identity.cluster_size();
        let i = self.identity.node_index();
        format!(
            "{n} > 0 AND {i} BETWEEN 0 AND {max_index} \
             AND MOD(MOD(UNIX_MICROS({timestamp_column}), {n}) + {n}, {n}) = {i}",
            max_index = n - 1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_node_owns_every_timestamp() {
        let timestamps = [
            i64::MIN,
            i64::MIN + 1,
            -1_000_000_007,
            -7,
            -1,
            0,
            1,
            5,
            6,
            1_700_000_000_000_001,
            i64::MAX - 1,
            i64::MAX,
        ];

        for cluster_size in 1..=13 {
            let predicates: Vec<_> = (0..cluster_size)
                .map(|i| PartitionPredicate::new(i, cluster_size).unwrap())
                .collect();

            for ts in timestamps.map(MicrosSinceEpoch::new) {
                let owners = predicates.iter().filter(|p| p.contains(ts)).count();
                assert_eq!(owners, 1, "timestamp {ts:?} with cluster size {cluster_size}");
            }
        }
    }

    #[test]
    fn negative_timestamps_use_floor_modulo() {
        assert_eq!(owner_of(MicrosSinceEpoch::new(-1), 6), NodeIndex::new(5));
        assert_eq!(owner_of(MicrosSinceEpoch::new(-6), 6), NodeIndex::new(0));
        assert_eq!(owner_of(MicrosSinceEpoch::new(-7), 6), NodeIndex::new(5));
    }

    #[test]
    fn invalid_predicates_fail_at_construction() {
        assert!(PartitionPredicate::new(0, 0).is_err());
        assert!(PartitionPredicate::new(3, 3).is_err());
    }

    #[test]
    fn renders_floor_modulo_condition() {
        let predicate = PartitionPredicate::new(2, 6).unwrap();
        assert_eq!(
            predicate.sql_condition("`timestamp`"),
            "6 > 0 AND 2 BETWEEN 0 AND 5 \
             AND MOD(MOD(UNIX_MICROS(`timestamp`), 6) + 6, 6) = 2"
        );
    }
}
