// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Finds slow and failed upstream transactions in a timestamped dnscache log.
//!
//! dnscache logs a `tx` line when it sends a query upstream and an `rr` line
//! for every record it gets back. It tries the listed servers one at a time,
//! left to right, so an answer from the third server means the first two
//! did not answer.

use std::hash::BuildHasherDefault;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use derive_more::Display;
use fnv::FnvHasher;
use hashbrown::HashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use crate::source::LineSource;
use crate::tai64;

/// `<label> tx <glue> <type> <name> <control> <server>...`
/// and `<label> rr <server> <ttl> <type> <name> <data>...`
const MIN_FIELDS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Finding {
    /// A server listed ahead of the one that answered.
    #[display("txfail {server} {name}")]
    TxFail { server: String, name: String },
    /// An answer that arrived after the threshold.
    #[display("txslow {server} {name} {elapsed:?}")]
    TxSlow {
        server: String,
        name: String,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    name: String,
    server: String,
}

#[derive(Debug)]
struct Attempt {
    sent_at: SystemTime,
    servers: Arc<[String]>,
    order: usize,
}

#[derive(Debug)]
pub struct SlowLogCorrelator {
    threshold: Duration,
    requests: HashMap<RequestKey, Attempt, BuildHasherDefault<FnvHasher>>,
}

impl SlowLogCorrelator {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            requests: HashMap::default(),
        }
    }

    /// Number of `(name, server)` attempts still waiting for an answer.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    /// Feeds one log line and returns what it revealed.
    pub fn process_line(&mut self, line: &str) -> Vec<Finding> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return Vec::new();
        }
        let Ok(now) = tai64::parse(fields[0]) else {
            trace!("Skipping line without timestamp");
            return Vec::new();
        };

        match fields[1] {
            kind @ ("tx" | "rr") if fields.len() < MIN_FIELDS => {
                warn!("Short {kind} line: {line}");
                Vec::new()
            }
            "tx" => {
                self.record_attempt(fields[4], &fields[6..], now);
                Vec::new()
            }
            "rr" => self.answer(fields[5], fields[2], now),
            _ => Vec::new(),
        }
    }

    fn record_attempt(&mut self, name: &str, servers: &[&str], now: SystemTime) {
        let list: Arc<[String]> = servers.iter().map(|s| (*s).to_string()).collect();
        for (order, server) in servers.iter().enumerate() {
            let key = RequestKey {
                name: name.to_string(),
                server: (*server).to_string(),
            };
            self.requests.insert(
                key,
                Attempt {
                    sent_at: now,
                    servers: Arc::clone(&list),
                    order,
                },
            );
        }
    }

    fn answer(&mut self, name: &str, server: &str, now: SystemTime) -> Vec<Finding> {
        let key = RequestKey {
            name: name.to_string(),
            server: server.to_string(),
        };
        let Some(attempt) = self.requests.get(&key) else {
            return Vec::new();
        };

        let mut findings: Vec<Finding> = attempt.servers[..attempt.order]
            .iter()
            .map(|failed| Finding::TxFail {
                server: decode_ip(failed),
                name: name.to_string(),
            })
            .collect();

        let elapsed = now.duration_since(attempt.sent_at).unwrap_or_default();
        if elapsed > self.threshold {
            findings.push(Finding::TxSlow {
                server: decode_ip(server),
                name: name.to_string(),
                elapsed,
            });
        }

        let servers = Arc::clone(&attempt.servers);
        for server in servers.iter() {
            self.requests.remove(&RequestKey {
                name: name.to_string(),
                server: server.clone(),
            });
        }
        findings
    }

    /// Correlates every line of `source`, writing one finding per line to
    /// `out`.
    pub async fn run<S, W>(&mut self, mut source: S, out: &mut W) -> std::io::Result<()>
    where
        S: LineSource,
        W: AsyncWrite + Unpin + Send,
    {
        while let Some(line) = source.next_line().await? {
            for finding in self.process_line(&line) {
                out.write_all(format!("{finding}\n").as_bytes()).await?;
            }
        }
        out.flush().await
    }
}

/// Formats a hex-encoded server address; anything that is not 8 or 32 hex
/// digits is returned as is.
#[must_use]
pub fn decode_ip(hex: &str) -> String {
    match hex.len() {
        8 => u32::from_str_radix(hex, 16)
            .map(|bits| Ipv4Addr::from(bits).to_string())
            .unwrap_or_else(|_| hex.to_string()),
        32 => u128::from_str_radix(hex, 16)
            .map(|bits| Ipv6Addr::from(bits).to_string())
            .unwrap_or_else(|_| hex.to_string()),
        _ => hex.to_string(),
    }
}
