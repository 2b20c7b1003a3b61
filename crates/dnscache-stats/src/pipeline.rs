// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The input loop.
//!
//! Reads lines, classifies them and folds them into the shared aggregator.
//! In live mode a sampler task closes windows on wall-clock ticks and the
//! loop only has to tell it when input ends. In replay mode the loop itself
//! closes windows as the log's timestamps cross interval boundaries.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::aggregator::Aggregator;
use crate::constants;
use crate::delivery::MetricSender;
use crate::event::classify;
use crate::sampler::{take_sample, Sampler, SamplingMode};
use crate::source::LineSource;
use crate::tai64;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Length of one window.
    pub interval: Duration,
    pub mode: SamplingMode,
    /// Maximum number of queries awaiting their `sent` line.
    pub query_tracking_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval: constants::DEFAULT_INTERVAL,
            mode: SamplingMode::Live,
            query_tracking_limit: constants::QUERY_TRACKING_LIMIT,
        }
    }
}

pub struct Pipeline {
    aggregator: Arc<Mutex<Aggregator>>,
    sampler: Sampler,
    sender: MetricSender,
}

impl Pipeline {
    /// Creates a pipeline delivering window snapshots to `sender`.
    #[must_use]
    pub fn new(config: &PipelineConfig, sender: MetricSender) -> Self {
        Self {
            aggregator: Arc::new(Mutex::new(Aggregator::new(config.query_tracking_limit))),
            sampler: Sampler::new(config.mode, config.interval),
            sender,
        }
    }

    /// Shared handle on the aggregate state.
    #[must_use]
    pub fn aggregator(&self) -> Arc<Mutex<Aggregator>> {
        Arc::clone(&self.aggregator)
    }

    /// Consumes `source` until it ends or fails, then closes the metric
    /// stream. Windows still open at that point are not reported.
    pub async fn run<S: LineSource>(self, mut source: S) {
        let Pipeline {
            aggregator,
            sampler,
            sender,
        } = self;
        let mut lines: u64 = 0;

        match sampler {
            Sampler::Live(live) => {
                let cancel_token = CancellationToken::new();
                let sampler_task = tokio::spawn(live.run(
                    Arc::clone(&aggregator),
                    sender,
                    cancel_token.clone(),
                ));

                while let Some(line) = next_line(&mut source).await {
                    lines += 1;
                    let tokens: Vec<&str> = line.split_whitespace().collect();
                    apply(&aggregator, &tokens, SystemTime::now());
                }

                cancel_token.cancel();
                if let Err(e) = sampler_task.await {
                    error!("Live sampler task failed: {e}");
                }
            }
            Sampler::Replay(mut replay) => {
                while let Some(line) = next_line(&mut source).await {
                    lines += 1;
                    let tokens: Vec<&str> = line.split_whitespace().collect();
                    let Some((label, rest)) = tokens.split_first() else {
                        continue;
                    };
                    let now = match tai64::parse(label) {
                        Ok(now) => now,
                        Err(e) => {
                            debug!("Bad timestamp {label:?}: {e}");
                            continue;
                        }
                    };

                    // The window closes before this line is counted.
                    if let Some(ts) = replay.observe(now) {
                        take_sample(&aggregator, &sender, ts);
                    }
                    apply(&aggregator, rest, now);
                }
                drop(sender);
            }
        }

        debug!("Finished processing log after {lines} lines");
    }
}

async fn next_line<S: LineSource>(source: &mut S) -> Option<String> {
    match source.next_line().await {
        Ok(line) => line,
        Err(e) => {
            debug!("Stopped reading input: {e}");
            None
        }
    }
}

fn apply(aggregator: &Mutex<Aggregator>, tokens: &[&str], now: SystemTime) {
    let Some(event) = classify(tokens) else {
        trace!("Ignoring line {tokens:?}");
        return;
    };
    #[allow(clippy::expect_used)]
    let mut aggregator = aggregator.lock().expect("lock poisoned");
    aggregator.insert(event, now);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::delivery::{self, MetricReceiver};
    use crate::metric::{Metric, MetricName};
    use crate::source::ReaderSource;
    use std::time::UNIX_EPOCH;
    use tokio::io::{AsyncWriteExt, BufReader};

    const MINUTE: Duration = Duration::from_secs(60);

    // 2016-02-01T00:00:00Z, a whole minute.
    fn base() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_454_284_800)
    }

    fn line(at: Duration, rest: &str) -> String {
        format!("{} {rest}\n", tai64::format(base() + at))
    }

    fn replay_config() -> PipelineConfig {
        PipelineConfig {
            interval: MINUTE,
            mode: SamplingMode::Replay,
            ..Default::default()
        }
    }

    async fn drain(mut rx: MetricReceiver) -> Vec<Vec<Metric>> {
        let mut batches: Vec<Vec<Metric>> = Vec::new();
        while let Some(metric) = rx.recv().await {
            if metric.name == MetricName::Queries {
                batches.push(Vec::new());
            }
            batches.last_mut().unwrap().push(metric);
        }
        batches
    }

    fn value(batch: &[Metric], name: MetricName) -> i64 {
        batch.iter().find(|m| m.name == name).unwrap().value
    }

    async fn replay(input: String) -> Vec<Vec<Metric>> {
        let (tx, rx) = delivery::channel(1_000);
        let pipeline = Pipeline::new(&replay_config(), tx);
        pipeline
            .run(ReaderSource::new(input.as_bytes()))
            .await;
        drain(rx).await
    }

    #[tokio::test]
    async fn test_replay_latency_scenario() {
        let input = [
            line(Duration::from_millis(1_000), "query A 7f000001:a3c1:ba9c 1 example.com."),
            line(Duration::from_millis(1_002), "query B 7f000001:a3c2:ba9d 1 example.org."),
            line(Duration::from_millis(1_005), "sent A 52"),
            line(Duration::from_secs(61), "cached 1 example.com."),
        ]
        .concat();

        let batches = replay(input).await;
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 10);
        assert!(batch.iter().all(|m| m.timestamp == base()));
        assert_eq!(value(batch, MetricName::Queries), 2);
        assert_eq!(value(batch, MetricName::QueryMaxUs), 5_000);
        assert_eq!(value(batch, MetricName::QueryAvgUs), 2_500);
        assert_eq!(value(batch, MetricName::Drop), 0);
        // The line that closed the window belongs to the next one.
        assert_eq!(value(batch, MetricName::CacheHits), 0);
    }

    #[tokio::test]
    async fn test_replay_query_completes_in_later_window() {
        let input = [
            line(Duration::from_secs(59), "query 9 7f000001:a3c1:ba9c 1 example.com."),
            line(Duration::from_secs(61), "sent 9 52"),
            line(Duration::from_secs(125), "tx 0 1 example.com. . c0a80001"),
        ]
        .concat();

        let batches = replay(input).await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].timestamp, base());
        assert_eq!(batches[1][0].timestamp, base() + MINUTE);
        assert_eq!(value(&batches[0], MetricName::Queries), 1);
        assert_eq!(value(&batches[0], MetricName::QueryMaxUs), 0);
        assert_eq!(value(&batches[1], MetricName::Queries), 0);
        assert_eq!(value(&batches[1], MetricName::QueryMaxUs), 2_000_000);
        assert_eq!(value(&batches[1], MetricName::Tx), 0);
    }

    #[tokio::test]
    async fn test_replay_skips_bad_timestamps_and_noise() {
        let input = [
            "not-a-label cached 1 example.com.\n".to_string(),
            "\n".to_string(),
            line(Duration::from_secs(1), "servfail example.com. timed out"),
            line(Duration::from_secs(2), "starting"),
            line(Duration::from_secs(3), "stats 10 4096 3 nope"),
            line(Duration::from_secs(4), "stats 11 4196 1 2"),
            line(Duration::from_secs(60), "cached 1 example.com."),
        ]
        .concat();

        let batches = replay(input).await;
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(value(batch, MetricName::Servfail), 1);
        assert_eq!(value(batch, MetricName::CacheHits), 0);
        assert_eq!(value(batch, MetricName::CacheMotion), 100);
        assert_eq!(value(batch, MetricName::UdpActive), 3);
        assert_eq!(value(batch, MetricName::TcpActive), 2);
    }

    #[tokio::test]
    async fn test_replay_without_input_closes_stream() {
        let batches = replay(String::new()).await;
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn test_replay_respects_query_tracking_limit() {
        let mut input: String = (0..101)
            .map(|i| line(Duration::from_secs(1), &format!("query {i} c0a80001:1:1 1 a.")))
            .collect();
        input.push_str(&line(Duration::from_secs(2), "sent 100 52"));
        input.push_str(&line(Duration::from_secs(60), "cached 1 a."));

        let (tx, rx) = delivery::channel(1_000);
        let pipeline = Pipeline::new(
            &PipelineConfig {
                query_tracking_limit: 100,
                ..replay_config()
            },
            tx,
        );
        let aggregator = pipeline.aggregator();
        pipeline.run(ReaderSource::new(input.as_bytes())).await;

        let batches = drain(rx).await;
        assert_eq!(value(&batches[0], MetricName::Queries), 100);
        assert_eq!(value(&batches[0], MetricName::QueryMaxUs), 0);
        // Queries seen inside the closed window are not swept.
        assert_eq!(aggregator.lock().unwrap().pending_len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_pipeline_closes_stream_when_input_ends() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let (tx, rx) = delivery::channel(1_000);
        let pipeline = Pipeline::new(
            &PipelineConfig {
                interval: Duration::from_millis(40),
                mode: SamplingMode::Live,
                ..Default::default()
            },
            tx,
        );
        let running = tokio::spawn(pipeline.run(ReaderSource::new(BufReader::new(reader))));

        writer
            .write_all(b"query 1 7f000001:a3c1:ba9c 1 example.com.\nsent 1 52\ncached 1 x\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(writer);
        running.await.unwrap();

        let batches = drain(rx).await;
        assert!(batches.len() >= 3);
        // All input was read before the first tick.
        assert_eq!(value(&batches[0], MetricName::Queries), 1);
        assert_eq!(value(&batches[0], MetricName::CacheHits), 1);
        let total = |name| batches.iter().map(|b| value(b, name)).sum::<i64>();
        assert_eq!(total(MetricName::Queries), 1);
        assert_eq!(total(MetricName::CacheHits), 1);
        for pair in batches.windows(2) {
            assert!(pair[0][0].timestamp < pair[1][0].timestamp);
        }
    }
}
