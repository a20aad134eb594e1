// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt::Display;

use shardsync_types::config::{CommonOptions, LogFormat};
use tracing::{info, Level};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot parse log filter '{filter}': {source}")]
    LogDirectiveParseError {
        filter: String,
        #[source]
        source: ParseError,
    },
    #[error("could not install the global subscriber: {0}")]
    Init(#[from] TryInitError),
}

fn build_logging_layer<S>(common_opts: &CommonOptions) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    match common_opts.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(
                // Write WARN and ERR to stderr, everything else to stdout
                std::io::stderr
                    .with_max_level(Level::WARN)
                    .or_else(std::io::stdout),
            )
            .with_ansi(!common_opts.log_disable_ansi_codes)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(!common_opts.log_disable_ansi_codes)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_ansi(false)
            .boxed(),
    }
}

/// Builds the log filter. `RUST_LOG` takes precedence over the configured `log-filter`.
pub fn log_filter(common_opts: &CommonOptions) -> Result<EnvFilter, Error> {
    let filter = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| common_opts.log_filter.clone());

    EnvFilter::try_new(&filter).map_err(|source| Error::LogDirectiveParseError { filter, source })
}

/// Installs the global logging subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing_and_logging(
    common_opts: &CommonOptions,
    service_name: impl Display,
) -> Result<(), Error> {
    let filter = log_filter(common_opts)?;

    tracing_subscriber::registry()
        .with(build_logging_layer(common_opts).with_filter(filter))
        .try_init()?;

    info!(
        service.name = %service_name,
        service.version = env!("CARGO_PKG_VERSION"),
        "Logging initialized with format {:?}", common_opts.log_format
    );
    Ok(())
}
