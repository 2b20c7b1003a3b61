// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname and service-name detection for metric names.
//!
//! Both are resolved once at startup and passed to the sink as a
//! [`HostIdentity`] value.

use std::env;
use std::path::Path;

use tracing::warn;

/// Names substituted into metric name templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub service: String,
}

impl HostIdentity {
    /// Detects both names from the environment and the working directory.
    #[must_use]
    pub fn detect() -> Self {
        let cwd = env::current_dir().unwrap_or_default();
        Self {
            hostname: get_hostname(),
            service: guess_service_name(&cwd),
        }
    }
}

/// Short hostname of this machine.
///
/// Checked in order: `DNSCACHE_STATS_HOSTNAME`, `HOSTNAME`, then the system
/// hostname. Only the part before the first dot is kept, so a fully
/// qualified name does not add levels to a dotted metric path.
#[must_use]
pub fn get_hostname() -> String {
    let name = ["DNSCACHE_STATS_HOSTNAME", "HOSTNAME"]
        .iter()
        .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
        .or_else(|| match nix::unistd::gethostname() {
            Ok(name) => name.to_str().map(str::to_string),
            Err(e) => {
                warn!("Failed to get system hostname: {}", e);
                None
            }
        })
        .filter(|name| !name.is_empty());

    match name {
        Some(name) => short_name(&name).to_string(),
        None => {
            warn!("Could not determine hostname, using 'unknown'");
            "unknown".to_string()
        }
    }
}

fn short_name(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

/// Guesses the dnscache service name from a daemontools-style layout.
///
/// `/service/dnscache-ext/log` gives `dnscache-ext`; otherwise the nearest
/// path element containing `dnscache` wins. Falls back to `main` so metric
/// names stay well formed.
#[must_use]
pub fn guess_service_name(cwd: &Path) -> String {
    let name_of = |p: &Path| p.file_name().and_then(|n| n.to_str()).map(str::to_string);

    if name_of(cwd).as_deref() == Some("log") {
        if let Some(service) = cwd.parent().and_then(name_of) {
            return service;
        }
    }

    cwd.ancestors()
        .filter_map(name_of)
        .find(|el| el.contains("dnscache"))
        .unwrap_or_else(|| "main".to_string())
}
