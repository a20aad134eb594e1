// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! HTTP control plane of a shardsync node: issues cluster wide commands and exposes the
//! node's sync status, checkpoints, audit trail and synced records.

mod error;
mod rest_api;
mod service;
mod state;

pub use error::Error;
pub use rest_api::create_router;
pub use service::AdminService;
pub use state::AdminServiceState;
