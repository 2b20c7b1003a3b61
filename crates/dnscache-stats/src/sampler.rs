// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Window boundaries.
//!
//! Live input carries no timestamps, so a separate task closes windows on
//! wall-clock ticks. Replayed input carries TAI64N labels and windows close
//! as those labels cross interval boundaries, driven from the input loop.
//! Both align boundaries to multiples of the interval since the Unix epoch,
//! so restarts and replays yield comparable data points.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::delivery::MetricSender;

/// How window boundaries are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Wall-clock ticks, for a live log without timestamps.
    Live,
    /// Embedded TAI64N labels, for replaying a timestamped log.
    Replay,
}

#[derive(Debug)]
pub enum Sampler {
    Live(LiveSampler),
    Replay(ReplaySampler),
}

impl Sampler {
    #[must_use]
    pub fn new(mode: SamplingMode, interval: Duration) -> Self {
        match mode {
            SamplingMode::Live => Sampler::Live(LiveSampler { interval }),
            SamplingMode::Replay => Sampler::Replay(ReplaySampler::new(interval)),
        }
    }
}

/// Rounds `ts` down to a multiple of `interval` since the Unix epoch.
#[must_use]
pub fn truncate(ts: SystemTime, interval: Duration) -> SystemTime {
    let step = interval.as_nanos();
    if step == 0 {
        return ts;
    }
    match ts.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            let rem = since.as_nanos() % step;
            // rem < step, and step came from a Duration
            ts - Duration::from_nanos(u64::try_from(rem).unwrap_or(u64::MAX))
        }
        Err(_) => ts,
    }
}

/// Closes the current window at `ts` and hands its metrics to the sink.
///
/// The lock is released before any metric is sent.
pub fn take_sample(aggregator: &Mutex<Aggregator>, sender: &MetricSender, ts: SystemTime) {
    let metrics = {
        #[allow(clippy::expect_used)]
        let mut aggregator = aggregator.lock().expect("lock poisoned");
        aggregator.sample(ts)
    };
    for metric in metrics {
        sender.send(metric);
    }
}

#[derive(Debug)]
pub struct LiveSampler {
    interval: Duration,
}

impl LiveSampler {
    /// Samples on every aligned tick until `cancel_token` fires, then drops
    /// `sender`, which closes the metric stream.
    pub async fn run(
        self,
        aggregator: Arc<Mutex<Aggregator>>,
        sender: MetricSender,
        cancel_token: CancellationToken,
    ) {
        let now = SystemTime::now();
        let next_boundary = truncate(now, self.interval) + self.interval;
        let delay = next_boundary.duration_since(now).unwrap_or_default();

        let mut ticker = interval_at(Instant::now() + delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Live sampler started, first window closes in {delay:?}");

        let mut previous = None;
        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let ts = live_timestamp(previous, SystemTime::now(), self.interval);
                    take_sample(&aggregator, &sender, ts);
                    previous = Some(ts);
                }
            }
        }

        debug!("Live sampler stopped");
    }
}

/// Timestamp for a live tick: the boundary that just passed, moved past
/// `previous` when the wall clock lags the tick timer.
fn live_timestamp(
    previous: Option<SystemTime>,
    now: SystemTime,
    interval: Duration,
) -> SystemTime {
    let ts = truncate(now, interval);
    match previous {
        Some(previous) if ts <= previous => previous + interval,
        _ => ts,
    }
}

/// Tracks window boundaries from timestamps read off the log.
#[derive(Debug)]
pub struct ReplaySampler {
    interval: Duration,
    last_boundary: Option<SystemTime>,
}

impl ReplaySampler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_boundary: None,
        }
    }

    /// Feeds the timestamp of the next line, before that line is applied.
    ///
    /// Returns the timestamp to sample with when the line starts a new
    /// window: the start of the window being closed.
    pub fn observe(&mut self, now: SystemTime) -> Option<SystemTime> {
        let Some(last) = self.last_boundary else {
            self.last_boundary = Some(truncate(now, self.interval));
            return None;
        };

        let elapsed = now.duration_since(last).unwrap_or_default();
        if elapsed < self.interval {
            return None;
        }
        self.last_boundary = Some(truncate(now, self.interval));
        Some(last)
    }

    #[must_use]
    pub fn last_boundary(&self) -> Option<SystemTime> {
        self.last_boundary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::delivery;
    use crate::event::Event;
    use proptest::prelude::*;

    fn secs(s: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(s)
    }

    #[test]
    fn test_truncate_aligns_to_epoch_multiples() {
        let minute = Duration::from_secs(60);
        assert_eq!(truncate(secs(125), minute), secs(120));
        assert_eq!(truncate(secs(120), minute), secs(120));
        assert_eq!(
            truncate(secs(59) + Duration::from_nanos(999_999_999), minute),
            secs(0)
        );
        assert_eq!(truncate(secs(7), Duration::ZERO), secs(7));
    }

    // A multiple of both 30s and 60s.
    const BASE: u64 = 1_800_000;

    #[test]
    fn test_replay_first_line_only_sets_boundary() {
        let mut sampler = ReplaySampler::new(Duration::from_secs(30));
        assert_eq!(sampler.observe(secs(BASE + 12)), None);
        assert_eq!(sampler.last_boundary(), Some(secs(BASE)));
    }

    #[test]
    fn test_replay_closes_window_on_crossing() {
        let mut sampler = ReplaySampler::new(Duration::from_secs(30));
        assert_eq!(sampler.observe(secs(BASE + 12)), None);
        assert_eq!(sampler.observe(secs(BASE + 29)), None);
        assert_eq!(sampler.observe(secs(BASE + 31)), Some(secs(BASE)));
        assert_eq!(sampler.last_boundary(), Some(secs(BASE + 30)));
        assert_eq!(sampler.observe(secs(BASE + 59)), None);
        assert_eq!(sampler.observe(secs(BASE + 60)), Some(secs(BASE + 30)));
        // A gap of several intervals closes a single window.
        assert_eq!(sampler.observe(secs(BASE + 200)), Some(secs(BASE + 60)));
        assert_eq!(sampler.last_boundary(), Some(secs(BASE + 180)));
    }

    #[test]
    fn test_replay_ignores_clock_going_backwards() {
        let mut sampler = ReplaySampler::new(Duration::from_secs(30));
        sampler.observe(secs(BASE + 200));
        assert_eq!(sampler.observe(secs(BASE)), None);
        assert_eq!(sampler.last_boundary(), Some(secs(BASE + 180)));
    }

    #[test]
    fn test_take_sample_delivers_full_batch() {
        let aggregator = Mutex::new(Aggregator::default());
        let (tx, rx) = delivery::channel(100);
        aggregator
            .lock()
            .unwrap()
            .insert(Event::Query { id: "1" }, secs(10));

        take_sample(&aggregator, &tx, secs(0));
        assert_eq!(rx.len(), 10);
        assert_eq!(aggregator.lock().unwrap().pending_len(), 1);
    }

    #[tokio::test]
    async fn test_live_sampler_stops_on_cancel_and_closes_stream() {
        let aggregator = Arc::new(Mutex::new(Aggregator::default()));
        let (tx, mut rx) = delivery::channel(100);
        let cancel_token = CancellationToken::new();

        let sampler = LiveSampler {
            interval: Duration::from_secs(3600),
        };
        let task = tokio::spawn(sampler.run(aggregator, tx, cancel_token.clone()));
        cancel_token.cancel();
        task.await.unwrap();

        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_live_timestamp_never_repeats() {
        let minute = Duration::from_secs(60);
        assert_eq!(live_timestamp(None, secs(BASE + 60), minute), secs(BASE + 60));
        // Tick fired a few ms before the wall clock reached the boundary.
        assert_eq!(
            live_timestamp(
                Some(secs(BASE + 60)),
                secs(BASE + 119) + Duration::from_millis(995),
                minute
            ),
            secs(BASE + 120)
        );
        // Wall clock stepped back by several windows.
        assert_eq!(
            live_timestamp(Some(secs(BASE + 120)), secs(BASE), minute),
            secs(BASE + 180)
        );
        // Skipped ticks or a forward step follow the wall clock.
        assert_eq!(
            live_timestamp(Some(secs(BASE + 120)), secs(BASE + 305), minute),
            secs(BASE + 300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_sampler_stamps_aligned_windows() {
        let interval = Duration::from_millis(40);
        let aggregator = Arc::new(Mutex::new(Aggregator::default()));
        let (tx, mut rx) = delivery::channel(1_000);
        let cancel_token = CancellationToken::new();

        aggregator.lock().unwrap().insert(Event::Tx, SystemTime::now());
        let task = tokio::spawn(LiveSampler { interval }.run(
            Arc::clone(&aggregator),
            tx,
            cancel_token.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel_token.cancel();
        task.await.unwrap();

        let mut batches = 0;
        let mut tx_total = 0;
        let mut last = UNIX_EPOCH;
        while let Some(metric) = rx.recv().await {
            assert_eq!(truncate(metric.timestamp, interval), metric.timestamp);
            if metric.name == crate::metric::MetricName::Queries {
                assert!(metric.timestamp > last);
                last = metric.timestamp;
            } else {
                assert_eq!(metric.timestamp, last);
            }
            if metric.name == crate::metric::MetricName::Tx {
                batches += 1;
                tx_total += metric.value;
            }
        }
        // Ticks at or before 150ms of (paused) time.
        assert!(batches >= 3);
        assert_eq!(tx_total, 1);
    }

    proptest! {
        #[test]
        fn prop_replay_boundaries_are_aligned_and_ordered(
            start in 1_000_000u64..2_000_000,
            interval_secs in 1u64..120,
            steps in proptest::collection::vec(0u64..400, 1..200),
        ) {
            let interval = Duration::from_secs(interval_secs);
            let mut sampler = ReplaySampler::new(interval);
            let first = secs(start);

            let mut now = first;
            let mut emitted = Vec::new();
            emitted.extend(sampler.observe(now));
            for step in steps {
                now += Duration::from_secs(step);
                emitted.extend(sampler.observe(now));
            }

            if let Some(head) = emitted.first() {
                prop_assert_eq!(*head, truncate(first, interval));
            }
            for pair in emitted.windows(2) {
                let gap = pair[1].duration_since(pair[0]).unwrap();
                prop_assert!(gap >= interval);
                prop_assert_eq!(gap.as_nanos() % interval.as_nanos(), 0);
            }
        }
    }
}
