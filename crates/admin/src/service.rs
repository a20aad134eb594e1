// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AdminServiceState;
use crate::{rest_api, Error};

pub struct AdminService {
    state: AdminServiceState,
}

impl AdminService {
    pub fn new(state: AdminServiceState) -> Self {
        Self { state }
    }

    pub async fn run(
        self,
        bind_address: SocketAddr,
        cancellation: CancellationToken,
    ) -> anyhow::Result<()> {
        let router = rest_api::create_router(self.state).layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|err| Error::Binding {
                address: bind_address,
                source: err,
            })?;
        let local_addr = listener.local_addr().map_err(Error::Running)?;

        info!(
            net.host.addr = %local_addr.ip(),
            net.host.port = %local_addr.port(),
            "Admin API listening"
        );

        // Wait server graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(cancellation.cancelled_owned())
            .await
            .map_err(Error::Running)?;
        Ok(())
    }
}
