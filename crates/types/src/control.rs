// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The replicated control record through which the cluster is commanded.

use std::fmt;
use std::str::FromStr;

use bytestring::ByteString;

use crate::identifiers::NodeName;
use crate::time::MillisSinceEpoch;
use crate::{Version, Versioned};

/// Key of the singleton control record in the metadata store.
pub static CONTROL_STATE_KEY: ByteString = ByteString::from_static("sync-control");

/// Command that nodes apply to their local sync engines.
///
/// Values written by newer or misbehaving writers are kept as [`Command::Unrecognized`] so
/// that readers can log and skip them instead of failing to decode the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
    Validate,
    #[serde(untagged)]
    Unrecognized(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Validate => "validate",
            Command::Unrecognized(value) => value,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown action '{0}'; expected one of 'start', 'stop', 'validate'")]
pub struct UnknownAction(pub String);

/// Strict parsing used at the API boundary: only the three known actions are accepted.
impl FromStr for Command {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "validate" => Ok(Command::Validate),
            other => Err(UnknownAction(other.to_owned())),
        }
    }
}

/// The cluster-wide desired command. Every write produces a strictly higher version.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub command: Command,
    pub version: Version,
    pub commanded_at: MillisSinceEpoch,
    pub commanded_by: Option<NodeName>,
}

impl ControlState {
    /// The record written when a cluster is bootstrapped.
    pub fn bootstrap() -> Self {
        Self {
            command: Command::Stop,
            version: Version::MIN,
            commanded_at: MillisSinceEpoch::now(),
            commanded_by: None,
        }
    }

    /// Derives the record superseding `previous` (or the bootstrap record if there is none).
    pub fn successor(previous: Option<&ControlState>, command: Command, by: NodeName) -> Self {
        let version = previous
            .map(|state| state.version)
            .unwrap_or(Version::MIN)
            .next();
        Self {
            command,
            version,
            commanded_at: MillisSinceEpoch::now(),
            commanded_by: Some(by),
        }
    }
}

impl Versioned for ControlState {
    fn version(&self) -> Version {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stored_commands_decode_as_unrecognized() {
        let state: ControlState = serde_json::from_str(
            r#"{"command":"launch","version":7,"commandedAt":0,"commandedBy":"node-0"}"#,
        )
        .unwrap();

        assert_eq!(state.command, Command::Unrecognized("launch".to_owned()));
        assert_eq!(state.version, Version::from(7));
    }

    #[test]
    fn known_commands_round_trip_as_lowercase() {
        let json = serde_json::to_string(&Command::Validate).unwrap();
        assert_eq!(json, r#""validate""#);
        assert_eq!(
            serde_json::from_str::<Command>(r#""start""#).unwrap(),
            Command::Start
        );
    }

    #[test]
    fn api_parsing_is_strict() {
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!(
            "launch".parse::<Command>(),
            Err(UnknownAction("launch".to_owned()))
        );
    }

    #[test]
    fn successor_increments_version() {
        let bootstrap = ControlState::bootstrap();
        let next = ControlState::successor(Some(&bootstrap), Command::Start, "n-0".into());
        assert_eq!(next.version, Version::from(1));

        let first = ControlState::successor(None, Command::Stop, "n-0".into());
        assert_eq!(first.version, Version::from(1));
    }
}
