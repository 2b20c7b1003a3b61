// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;

use tokio::io::BufReader;
use tracing::{debug, error, info};

use dnscache_stats::{
    delivery,
    host::HostIdentity,
    pipeline::Pipeline,
    sink::{Destination, Sink},
    source::{Echo, FollowFile, LineSource, ReaderSource},
};
use dnscache_stats_cli::{
    config::{self, Config},
    error::CliError,
    logging,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    logging::init(&config::log_level_from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CliError> {
    let destination = Destination::parse(&config::destination_arg(env::args().skip(1))?);
    let config = Config::from_env()?;
    let host = HostIdentity::detect();
    debug!("Configuration: {config:?}, host: {host:?}");

    let writer = destination.open().await?;
    let (sender, receiver) = delivery::channel(config.buffer);
    let sink = tokio::spawn(Sink::new(writer, config.name_template.clone(), host).run(receiver));

    let pipeline = Pipeline::new(&config.pipeline(), sender);
    info!(
        "Aggregating dnscache log every {:?} into {destination:?}",
        config.interval
    );
    match &config.input_file {
        Some(path) => {
            let source = FollowFile::open(path)
                .await
                .map_err(|source| CliError::Input {
                    path: path.display().to_string(),
                    source,
                })?;
            feed(pipeline, source, config.echo).await;
        }
        None => {
            let source = ReaderSource::new(BufReader::new(tokio::io::stdin()));
            feed(pipeline, source, config.echo).await;
        }
    }

    if let Err(e) = sink.await {
        error!("Metric sink task failed: {e}");
    }
    info!("Input ended, shutting down");
    Ok(())
}

async fn feed<S: LineSource>(pipeline: Pipeline, source: S, echo: bool) {
    if echo {
        pipeline.run(Echo::new(source, tokio::io::stdout())).await;
    } else {
        pipeline.run(source).await;
    }
}
