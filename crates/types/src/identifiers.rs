// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Identifiers of nodes and synchronized tables.

use std::fmt;

use bytestring::ByteString;

/// Position of a node within the cluster, in `0..cluster_size`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidNodeIdentity {
    #[error("cluster size must be greater than zero")]
    EmptyCluster,
    #[error("node index {node_index} is out of range for a cluster of {cluster_size} nodes")]
    IndexOutOfRange { node_index: u32, cluster_size: u32 },
}

/// Identity of this node within a fixed-size cluster. It is fixed for the lifetime of the
/// process; changing the cluster size requires restarting every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentity {
    node_index: NodeIndex,
    cluster_size: u32,
}

impl NodeIdentity {
    pub fn new(node_index: u32, cluster_size: u32) -> Result<Self, InvalidNodeIdentity> {
        if cluster_size == 0 {
            return Err(InvalidNodeIdentity::EmptyCluster);
        }
        if node_index >= cluster_size {
            return Err(InvalidNodeIdentity::IndexOutOfRange {
                node_index,
                cluster_size,
            });
        }

        Ok(Self {
            node_index: NodeIndex(node_index),
            cluster_size,
        })
    }

    /// A single node owning all rows.
    pub fn single_node() -> Self {
        Self {
            node_index: NodeIndex(0),
            cluster_size: 1,
        }
    }

    pub fn node_index(&self) -> NodeIndex {
        self.node_index
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_index, self.cluster_size)
    }
}

/// Human readable node name used in status responses and as `commanded-by` of control
/// commands, e.g. `worker-a-3`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(hostname: impl AsRef<str>, node_index: NodeIndex) -> Self {
        Self(format!("{}-{}", hostname.as_ref(), node_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of a configured table sync, e.g. `vessel_positions`.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct TableId(ByteString);

impl TableId {
    pub fn new(id: impl Into<ByteString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableId {
    fn from(value: &str) -> Self {
        Self(ByteString::from(value))
    }
}

impl From<String> for TableId {
    fn from(value: String) -> Self {
        Self(ByteString::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_identity_rejects_invalid_positions() {
        assert_eq!(
            NodeIdentity::new(0, 0),
            Err(InvalidNodeIdentity::EmptyCluster)
        );
        assert_eq!(
            NodeIdentity::new(6, 6),
            Err(InvalidNodeIdentity::IndexOutOfRange {
                node_index: 6,
                cluster_size: 6
            })
        );

        let identity = NodeIdentity::new(5, 6).unwrap();
        assert_eq!(identity.node_index(), NodeIndex::new(5));
        assert_eq!(identity.to_string(), "5/6");
    }

    #[test]
    fn node_name_combines_host_and_index() {
        assert_eq!(
            NodeName::new("worker-a", NodeIndex::new(3)).as_str(),
            "worker-a-3"
        );
    }
}
