// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reports failed and slow upstream transactions found in a timestamped
//! dnscache log read from a file or stdin.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::env;
use std::process::ExitCode;

use tokio::fs::File;
use tokio::io::BufReader;
use tracing::{debug, error};

use dnscache_stats::slowlogs::SlowLogCorrelator;
use dnscache_stats::source::ReaderSource;
use dnscache_stats_cli::{
    config::{self, SlowLogsConfig},
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
    let input = config::input_arg(env::args().skip(1))?;
    let config = SlowLogsConfig::from_env()?;
    debug!("Reporting answers slower than {:?}", config.threshold);

    let mut correlator = SlowLogCorrelator::new(config.threshold);
    let mut out = tokio::io::stdout();
    match input {
        Some(path) => {
            let file = File::open(&path).await.map_err(|source| CliError::Input {
                path: path.display().to_string(),
                source,
            })?;
            correlator
                .run(ReaderSource::new(BufReader::new(file)), &mut out)
                .await?;
        }
        None => {
            correlator
                .run(ReaderSource::new(BufReader::new(tokio::io::stdin())), &mut out)
                .await?;
        }
    }

    debug!("{} server attempts never answered", correlator.outstanding());
    Ok(())
}
