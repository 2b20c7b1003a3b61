// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-window counters and the pending-query map.
//!
//! The aggregator is shared between the input loop and the sampler behind a
//! mutex. Window counters are reset on every [`Aggregator::sample`]; pending
//! queries survive the boundary so a query can complete in a later window,
//! until they are swept as stale.

use std::hash::BuildHasherDefault;
use std::time::{Duration, SystemTime};

use fnv::FnvHasher;
use hashbrown::HashMap;

use crate::constants;
use crate::event::Event;
use crate::metric::{Metric, MetricName};

type PendingQueries = HashMap<String, SystemTime, BuildHasherDefault<FnvHasher>>;

/// Counters that only describe the current window.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Window {
    cache_hits: i64,
    dropped: i64,
    servfail: i64,
    outgoing: i64,
    nqueries: i64,
    latency_sum: Duration,
    max_latency: Duration,
    // Set by the first stats line of the window.
    cache_motion_start: Option<i64>,
    cache_motion_end: i64,
    active_udp: i64,
    active_tcp: i64,
}

#[derive(Debug)]
pub struct Aggregator {
    window: Window,
    pending: PendingQueries,
    max_pending: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new(constants::QUERY_TRACKING_LIMIT)
    }
}

impl Aggregator {
    /// Creates an aggregator tracking at most `max_pending` unanswered
    /// queries at a time.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        let hint = max_pending.min(constants::PENDING_QUERIES_HINT);
        Aggregator {
            window: Window::default(),
            pending: HashMap::with_capacity_and_hasher(hint, BuildHasherDefault::default()),
            max_pending,
        }
    }

    /// Applies one event observed at `now`.
    pub fn insert(&mut self, event: Event<'_>, now: SystemTime) {
        let window = &mut self.window;
        match event {
            Event::Cached => window.cache_hits += 1,
            Event::Drop { id } => {
                window.dropped += 1;
                self.pending.remove(id);
            }
            Event::Query { id } => {
                // Past the limit the query is neither tracked nor counted.
                if self.pending.len() < self.max_pending {
                    self.pending.insert(id.to_string(), now);
                    window.nqueries += 1;
                }
            }
            Event::Servfail => window.servfail += 1,
            Event::Sent { id } => {
                if let Some(seen) = self.pending.remove(id) {
                    let latency = now.duration_since(seen).unwrap_or_default();
                    window.max_latency = window.max_latency.max(latency);
                    window.latency_sum += latency;
                }
            }
            Event::Stats {
                motion,
                udp_active,
                tcp_active,
            } => {
                if let Some(motion) = motion {
                    window.cache_motion_start.get_or_insert(motion);
                    window.cache_motion_end = motion;
                }
                if let Some(udp) = udp_active {
                    window.active_udp = window.active_udp.max(udp);
                }
                if let Some(tcp) = tcp_active {
                    window.active_tcp = window.active_tcp.max(tcp);
                }
            }
            Event::Tx => window.outgoing += 1,
        }
    }

    /// Closes the current window: returns its metrics stamped `ts`, resets
    /// the window counters and forgets pending queries first seen before
    /// `ts`.
    ///
    /// The sweep bounds memory when `sent` lines go missing (log rotation,
    /// restarts, read errors).
    pub fn sample(&mut self, ts: SystemTime) -> Vec<Metric> {
        let window = std::mem::take(&mut self.window);

        let cache_motion = window
            .cache_motion_start
            .map_or(0, |start| window.cache_motion_end - start);
        let query_avg_us = if window.nqueries > 0 {
            micros(window.latency_sum) / i128::from(window.nqueries)
        } else {
            0
        };

        let values = [
            window.nqueries,
            cache_motion,
            window.active_udp,
            window.active_tcp,
            window.cache_hits,
            window.dropped,
            saturate(micros(window.max_latency)),
            window.servfail,
            window.outgoing,
            saturate(query_avg_us),
        ];

        self.pending.retain(|_, seen| *seen >= ts);

        MetricName::ALL
            .into_iter()
            .zip(values)
            .map(|(name, value)| Metric::new(name, ts, value))
            .collect()
    }

    /// Number of queries currently waiting for their answer.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

fn micros(d: Duration) -> i128 {
    i128::try_from(d.as_micros()).unwrap_or(i128::MAX)
}

fn saturate(v: i128) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
