// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of dnscache log lines.
//!
//! dnscache writes one event per line, keyword first. Only the keywords that
//! feed a metric are recognized; everything else is noise in a continuous log
//! and is dropped without complaint.

use tracing::trace;

/// Minimum number of tokens (keyword included) a line needs to be considered.
const MIN_TOKENS: usize = 3;

/// `stats <count> <motion> <udp-active> <tcp-active>`
const STATS_MIN_ARGS: usize = 4;

/// One actionable dnscache log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// Answer served from cache.
    Cached,
    /// Query abandoned by dnscache.
    Drop { id: &'a str },
    /// New query from a client.
    Query { id: &'a str },
    Servfail,
    /// Answer sent back to the client.
    Sent { id: &'a str },
    /// Periodic resolver counters. Each field is `None` when its token did
    /// not parse as an integer.
    Stats {
        motion: Option<i64>,
        udp_active: Option<i64>,
        tcp_active: Option<i64>,
    },
    /// Outgoing query to an upstream server.
    Tx,
}

/// Classifies a tokenized line whose timestamp, if any, has already been
/// stripped. Returns `None` when the line is not actionable.
#[must_use]
pub fn classify<'a>(tokens: &[&'a str]) -> Option<Event<'a>> {
    if tokens.len() < MIN_TOKENS {
        return None;
    }
    let (keyword, args) = (tokens[0], &tokens[1..]);

    let event = match keyword {
        "cached" => Event::Cached,
        "drop" => Event::Drop { id: args[0] },
        "query" => Event::Query { id: args[0] },
        "servfail" => Event::Servfail,
        "sent" => Event::Sent { id: args[0] },
        "stats" => {
            if args.len() < STATS_MIN_ARGS {
                trace!("Ignoring short stats line with {} arguments", args.len());
                return None;
            }
            Event::Stats {
                motion: args[1].parse().ok(),
                udp_active: args[2].parse().ok(),
                tcp_active: args[3].parse().ok(),
            }
        }
        "tx" => Event::Tx,
        _ => return None,
    };
    Some(event)
}
