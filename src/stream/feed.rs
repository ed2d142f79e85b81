//! Live feed: one producer advances the engine on a randomized cadence and
//! fans each item out to any number of push subscribers.
//!
//! Pull callers step the same engine through [`Feed::advance`], and their items
//! are broadcast as well, so push subscribers see every delivered id.

use crate::error::{Result, ServiceError};
use crate::metrics::FeedMetrics;
use crate::stream::engine::StreamEngine;
use crate::types::stream::StreamItem;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Uniformly random delay between feed steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cadence {
    min: Duration,
    max: Duration,
}

impl Cadence {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(2000))
    }
}

/// Shared handle to the engine and its push channel
#[derive(Clone)]
pub struct Feed {
    engine: Arc<StreamEngine>,
    sender: broadcast::Sender<StreamItem>,
    metrics: Arc<FeedMetrics>,
}

impl Feed {
    pub fn new(engine: Arc<StreamEngine>, channel_capacity: usize, metrics: Arc<FeedMetrics>) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            engine,
            sender,
            metrics,
        }
    }

    pub fn engine(&self) -> &Arc<StreamEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    /// Step the engine on the blocking pool and publish the item.
    ///
    /// The item is broadcast while the engine lock is held, so push
    /// subscribers receive items in commit order even when the producer and
    /// pull callers step concurrently.
    pub async fn advance(&self) -> Result<StreamItem> {
        let engine = self.engine.clone();
        let sender = self.sender.clone();
        let metrics = self.metrics.clone();
        let started = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || {
            engine.step_then(|item| publish(&sender, &metrics, item))
        })
        .await
        .map_err(|e| ServiceError::inference(format!("feed step task failed: {}", e)))?;

        match outcome {
            Ok(item) => {
                self.metrics.record_step(started.elapsed(), item.score.risk_level);
                Ok(item)
            }
            Err(e) => {
                self.metrics.record_step_failure();
                Err(e)
            }
        }
    }

    pub fn subscribe(&self) -> FeedSubscription {
        FeedSubscription {
            receiver: self.sender.subscribe(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn publish(sender: &broadcast::Sender<StreamItem>, metrics: &FeedMetrics, item: &StreamItem) {
    match sender.send(item.clone()) {
        Ok(receivers) => {
            metrics.record_published();
            debug!(id = item.id, receivers = receivers, "Stream item published");
        }
        // No subscribers right now; pull callers still see it in the buffer
        Err(_) => debug!(id = item.id, "Stream item published with no subscribers"),
    }
}

/// One push subscriber's view of the feed
pub struct FeedSubscription {
    receiver: broadcast::Receiver<StreamItem>,
    metrics: Arc<FeedMetrics>,
}

impl FeedSubscription {
    /// Next item; skips ahead when this subscriber fell behind.
    /// `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Push subscriber lagged, skipping items");
                    self.metrics.record_lagged(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Drives the feed on its own cadence until aborted
pub struct FeedProducer {
    feed: Feed,
    cadence: Cadence,
}

impl FeedProducer {
    pub fn new(feed: Feed, cadence: Cadence) -> Self {
        Self { feed, cadence }
    }

    pub async fn run(self) {
        let mut rng = StdRng::from_entropy();

        loop {
            if let Err(e) = self.feed.advance().await {
                warn!(error = %e, "Feed step failed");
            }
            tokio::time::sleep(self.cadence.next_delay(&mut rng)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::models::combiner::testing::{features_for, stub_combiner};
    use crate::models::combiner::ScoreCombiner;
    use crate::stream::pool::DemoPool;
    use crate::types::transaction::TransactionRecord;

    fn feed_with(combiner: ScoreCombiner, rows: usize, channel_capacity: usize) -> Feed {
        let records = (0..rows)
            .map(|i| TransactionRecord::new(i as f64, 1.0, features_for(0.2, 0)))
            .collect();
        let engine = StreamEngine::new(
            Arc::new(Dataset::from_records(records)),
            Arc::new(combiner),
            DemoPool::from_indices((0..rows).collect()),
            100,
        )
        .unwrap();
        Feed::new(Arc::new(engine), channel_capacity, Arc::new(FeedMetrics::new()))
    }

    #[test]
    fn test_cadence_bounds() {
        let cadence = Cadence::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let delay = cadence.next_delay(&mut rng);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(2000));
        }

        let fixed = Cadence::new(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(fixed.next_delay(&mut rng), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_advance_broadcasts_to_every_subscriber() {
        let feed = feed_with(stub_combiner(), 5, 16);
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        let item = feed.advance().await.unwrap();

        assert_eq!(first.next().await.unwrap(), item);
        assert_eq!(second.next().await.unwrap(), item);
    }

    #[tokio::test]
    async fn test_advance_without_subscribers_still_buffers() {
        let feed = feed_with(stub_combiner(), 5, 16);
        feed.advance().await.unwrap();
        feed.advance().await.unwrap();

        assert_eq!(feed.engine().buffered(None, 10).len(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_ahead() {
        let feed = feed_with(stub_combiner(), 10, 2);
        let mut slow = feed.subscribe();

        for _ in 0..5 {
            feed.advance().await.unwrap();
        }

        // Only the last two fit in the channel
        assert_eq!(slow.next().await.unwrap().id, 3);
        assert_eq!(slow.next().await.unwrap().id, 4);
        assert_eq!(
            feed.metrics()
                .lagged_items
                .load(std::sync::atomic::Ordering::Relaxed),
            3
        );
        // the engine itself never stalled
        assert_eq!(feed.engine().live_stats().total, 5);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let feed = feed_with(stub_combiner(), 5, 16);
        let dropped = feed.subscribe();
        let mut kept = feed.subscribe();
        drop(dropped);

        let item = feed.advance().await.unwrap();
        assert_eq!(kept.next().await.unwrap(), item);
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_advances_broadcast_in_commit_order() {
        const TASKS: usize = 8;
        const STEPS: usize = 200;

        // small pool so the run crosses several cycle boundaries
        let feed = feed_with(stub_combiner(), 50, TASKS * STEPS);
        let mut subscription = feed.subscribe();

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let feed = feed.clone();
                tokio::spawn(async move {
                    for _ in 0..STEPS {
                        feed.advance().await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = Vec::with_capacity(TASKS * STEPS);
        for _ in 0..TASKS * STEPS {
            let item = subscription.next().await.unwrap();
            received.push((item.cycle, item.id));
        }

        let expected: Vec<(u64, u64)> = (0..(TASKS * STEPS) as u64)
            .map(|n| (n / 50, n % 50))
            .collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_failed_step_is_counted() {
        let feed = feed_with(ScoreCombiner::unloaded(), 3, 4);

        assert_eq!(feed.advance().await.unwrap_err(), ServiceError::ModelsNotReady);
        assert_eq!(
            feed.metrics()
                .step_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_producer_advances_on_its_own() {
        let feed = feed_with(stub_combiner(), 10, 16);
        let mut subscription = feed.subscribe();
        let producer = FeedProducer::new(
            feed.clone(),
            Cadence::new(Duration::from_millis(10), Duration::from_millis(10)),
        );
        let handle = tokio::spawn(producer.run());

        let first = subscription.next().await.unwrap();
        let second = subscription.next().await.unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);

        handle.abort();
    }
}
