// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded metric queue between the sampler and the sink.
//!
//! Sending never blocks. When the sink falls behind and the queue is full,
//! the oldest queued metric is evicted to make room.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::constants::DROP_NOTICE_EVERY;
use crate::metric::Metric;

#[derive(Debug)]
struct Queue {
    metrics: VecDeque<Metric>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

/// Creates a drop-oldest channel holding at most `capacity` metrics.
#[must_use]
pub fn channel(capacity: usize) -> (MetricSender, MetricReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            metrics: VecDeque::with_capacity(capacity),
            closed: false,
        }),
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        capacity,
    });
    (
        MetricSender {
            shared: Arc::clone(&shared),
        },
        MetricReceiver { shared },
    )
}

/// Producing half. There is exactly one; dropping it closes the channel.
#[derive(Debug)]
pub struct MetricSender {
    shared: Arc<Shared>,
}

impl MetricSender {
    /// Enqueues `metric`, evicting the oldest queued metric if the queue is
    /// full.
    pub fn send(&self, metric: Metric) {
        let evicted = {
            #[allow(clippy::expect_used)]
            let mut queue = self.shared.queue.lock().expect("lock poisoned");
            let evicted = if queue.metrics.len() >= self.shared.capacity {
                queue.metrics.pop_front().is_some()
            } else {
                false
            };
            queue.metrics.push_back(metric);
            evicted
        };

        if evicted {
            let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total % DROP_NOTICE_EVERY == 0 {
                warn!("Metric buffer full, dropped {total} metrics so far");
            }
        }
        self.shared.notify.notify_one();
    }

    /// Total metrics evicted since the channel was created.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for MetricSender {
    fn drop(&mut self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.closed = true;
        }
        self.shared.notify.notify_one();
    }
}

/// Consuming half, owned by the sink.
#[derive(Debug)]
pub struct MetricReceiver {
    shared: Arc<Shared>,
}

impl MetricReceiver {
    /// Waits for the next metric. Returns `None` once the sender is gone and
    /// everything it queued has been received.
    pub async fn recv(&mut self) -> Option<Metric> {
        loop {
            {
                #[allow(clippy::expect_used)]
                let mut queue = self.shared.queue.lock().expect("lock poisoned");
                if let Some(metric) = queue.metrics.pop_front() {
                    return Some(metric);
                }
                if queue.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Number of metrics currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let queue = self.shared.queue.lock().expect("lock poisoned");
        queue.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total metrics evicted since the channel was created.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
