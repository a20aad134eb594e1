// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shardsync_node::Node;
use shardsync_tracing_instrumentation::init_tracing_and_logging;
use shardsync_types::config::ConfigOverrides;
use shardsync_types::config_loader::ConfigLoaderBuilder;

mod signal;

const EXIT_CODE_FAILURE: i32 = 1;
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
struct ShardsyncArguments {
    /// Set a configuration file to use for shardsync.
    #[arg(
        short,
        long = "config-file",
        env = "SHARDSYNC_CONFIG",
        value_name = "FILE"
    )]
    config_file: Option<PathBuf>,

    /// Dumps the loaded configuration (or default if no config-file is set) to stdout and exits.
    /// Defaults will include any values overridden by environment variables.
    #[clap(long)]
    dump_config: bool,

    /// Position of this node within the cluster. Overrides `sync.node-index`.
    #[arg(long, value_name = "INDEX")]
    node_index: Option<u32>,

    /// Number of nodes in the cluster. Overrides `sync.cluster-size`.
    #[arg(long, value_name = "SIZE")]
    cluster_size: Option<u32>,
}

fn main() {
    let cli_args = ShardsyncArguments::parse();

    let config_loader = ConfigLoaderBuilder::default()
        .load_env(true)
        .path(cli_args.config_file.clone())
        .overrides(ConfigOverrides {
            node_index: cli_args.node_index,
            cluster_size: cli_args.cluster_size,
        })
        .build();
    let config = match config_loader.map_err(anyhow::Error::from).and_then(|loader| {
        loader.load_once().map_err(anyhow::Error::from)
    }) {
        Ok(config) => config,
        Err(err) => {
            // We cannot use tracing here as it's not configured yet
            eprintln!("{err:#}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };

    if cli_args.dump_config {
        match config.dump() {
            Ok(dump) => {
                println!("{dump}");
                std::process::exit(0);
            }
            Err(err) => {
                eprintln!("failed to dump configuration: {err}");
                std::process::exit(EXIT_CODE_FAILURE);
            }
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shardsync")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to build Tokio runtime: {err}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };

    let exit_code = runtime.block_on(async move {
        // Apply tracing config globally
        // We need to apply this first to log correctly
        if let Err(err) = init_tracing_and_logging(&config.common, "shardsync server") {
            eprintln!("failed to configure logging: {err}");
            return EXIT_CODE_FAILURE;
        }

        info!("Starting shardsync server {}", env!("CARGO_PKG_VERSION"));
        match &cli_args.config_file {
            Some(path) => info!("Loading configuration file from {}", path.display()),
            None => info!("Loading default built-in configuration"),
        }

        let config = Arc::new(config);
        let node = match Node::create(config.as_ref().clone()).await {
            Ok(node) => node,
            Err(err) => {
                error!("shardsync node failed to start: {err}");
                return EXIT_CODE_FAILURE;
            }
        };

        tokio::spawn(signal::sigusr1_dump_config(Arc::clone(&config)));

        let cancellation = CancellationToken::new();
        let mut node_task = tokio::spawn(node.run(cancellation.clone()));

        let result = tokio::select! {
            signal_name = signal::shutdown() => {
                info!("Received shutdown signal {signal_name}.");
                cancellation.cancel();

                match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, &mut node_task).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Could not gracefully shut down shardsync, terminating now.");
                        return EXIT_CODE_FAILURE;
                    }
                }
            },
            result = &mut node_task => result,
        };

        match result {
            Ok(Ok(())) => {
                info!("shardsync has been gracefully shut down.");
                0
            }
            Ok(Err(err)) => {
                error!("shardsync node failed: {err:#}");
                EXIT_CODE_FAILURE
            }
            Err(err) => {
                error!("shardsync node panicked: {err}");
                EXIT_CODE_FAILURE
            }
        }
    });

    std::process::exit(exit_code);
}
