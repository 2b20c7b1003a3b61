// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use derive_more::Display;

/// The fixed set of metrics reported for every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MetricName {
    #[display("queries")]
    Queries,
    #[display("cache_motion")]
    CacheMotion,
    #[display("udp_active")]
    UdpActive,
    #[display("tcp_active")]
    TcpActive,
    #[display("cache_hits")]
    CacheHits,
    #[display("drop")]
    Drop,
    #[display("query_max_us")]
    QueryMaxUs,
    #[display("servfail")]
    Servfail,
    #[display("tx")]
    Tx,
    #[display("query_avg_us")]
    QueryAvgUs,
}

impl MetricName {
    /// Every name, in the order a window batch carries them.
    pub const ALL: [MetricName; 10] = [
        MetricName::Queries,
        MetricName::CacheMotion,
        MetricName::UdpActive,
        MetricName::TcpActive,
        MetricName::CacheHits,
        MetricName::Drop,
        MetricName::QueryMaxUs,
        MetricName::Servfail,
        MetricName::Tx,
        MetricName::QueryAvgUs,
    ];
}

/// One data point of a window snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub name: MetricName,
    pub timestamp: SystemTime,
    pub value: i64,
}

impl Metric {
    #[must_use]
    pub fn new(name: MetricName, timestamp: SystemTime, value: i64) -> Self {
        Self {
            name,
            timestamp,
            value,
        }
    }

    /// Whole seconds since the Unix epoch, as Graphite expects.
    #[must_use]
    pub fn unix_seconds(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}
