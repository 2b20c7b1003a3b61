// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use dnscache_stats::errors::SinkError;

/// Errors that stop one of the binaries
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Failed to open input {path}: {source}")]
    Input {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to process input: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit status: 2 for anything the operator has to fix on the
    /// command line or in the environment, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::InvalidConfig(_) | CliError::Usage(_) => 2,
            _ => 1,
        }
    }
}
