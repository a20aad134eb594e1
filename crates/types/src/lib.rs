// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! This crate contains the core types shared by the shardsync components.

pub mod checkpoint;
pub mod config;
pub mod config_loader;
pub mod control;
pub mod errors;
pub mod identifiers;
pub mod partitioning;
pub mod retries;
pub mod time;

/// Version of a value stored in the metadata store. Versions are compared to decide whether an
/// observed value supersedes the one a component already acted upon.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    serde::Serialize,
    serde::Deserialize,
)]
#[display("v{}", _0)]
#[serde(transparent)]
pub struct Version(u32);

impl Version {
    /// The version of a freshly bootstrapped value.
    pub const MIN: Self = Self(0);

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A value that carries its own [`Version`].
pub trait Versioned {
    fn version(&self) -> Version;
}

impl<T: Versioned> Versioned for &T {
    fn version(&self) -> Version {
        (**self).version()
    }
}

impl<T: Versioned> Versioned for std::sync::Arc<T> {
    fn version(&self) -> Version {
        (**self).version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ordered() {
        let v0 = Version::MIN;
        let v1 = v0.next();

        assert!(v1 > v0);
        assert_eq!(v1.as_u32(), 1);
        assert_eq!(v1.to_string(), "v1");
    }
}
