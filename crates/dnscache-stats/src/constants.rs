// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Capacity of the queue between the sampler and the sink.
pub const METRICS_BUFFER_MAX: usize = 100;

/// Upper bound on queries waiting for their `sent` line.
pub const QUERY_TRACKING_LIMIT: usize = 100_000;

/// Initial allocation for the pending-query map.
pub const PENDING_QUERIES_HINT: usize = 10_000;

/// A drop notice is logged once per this many discarded metrics.
pub const DROP_NOTICE_EVERY: u64 = 100;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_NAME_TEMPLATE: &str = "servers.{{.Hostname}}.dnscache.{{.Metric}}";

pub const GRAPHITE_DEFAULT_PORT: u16 = 2003;

/// How often a followed file is polled once its end has been reached.
pub const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(15);
