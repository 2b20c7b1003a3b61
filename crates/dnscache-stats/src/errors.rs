// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors decoding a TAI64N label.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("label must be '@' followed by 24 hex digits, got {0:?}")]
    Malformed(String),

    #[error("label {0:?} lies before the Unix epoch")]
    BeforeEpoch(String),

    #[error("nanosecond field {0} out of range")]
    Nanos(u32),
}

/// Errors parsing a metric name template.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,

    #[error("unknown template field '{0}', expected Hostname, Service or Metric")]
    UnknownField(String),

    #[error("unterminated placeholder in template {0:?}")]
    Unterminated(String),
}

/// Errors opening a metric destination.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to graphite at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
