//! Fan-out of a notification batch to the sink.
//!
//! Every (subscriber, issue) pair is delivered on its own. Watermarks move
//! only after delivery, and only as far as the lowest failed issue of the
//! same subscription allows.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use super::store::{NotificationSink, SubscriptionStore};
use super::types::{FeedId, NotificationBatch, SubscriberId};

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Pairs delivered.
    pub delivered: usize,
    /// Pairs the sink refused.
    pub failed: usize,
    /// Subscriptions whose watermark moved.
    pub watermarks_advanced: usize,
    /// Watermark updates the store rejected.
    pub watermark_errors: usize,
}

impl DispatchReport {
    /// Add another report to this one.
    pub fn absorb(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.watermarks_advanced += other.watermarks_advanced;
        self.watermark_errors += other.watermark_errors;
    }
}

/// Delivery progress of one subscriber on one feed.
#[derive(Debug, Default)]
struct Progress {
    delivered: Vec<i64>,
    lowest_failed: Option<i64>,
}

impl Progress {
    /// Highest delivered number below every failed one.
    fn commit_point(&self) -> Option<i64> {
        self.delivered
            .iter()
            .copied()
            .filter(|n| self.lowest_failed.map_or(true, |failed| *n < failed))
            .max()
    }
}

/// Delivers batches and advances watermarks.
pub struct Dispatcher<T, K> {
    subscriptions: T,
    sink: K,
}

impl<T: SubscriptionStore, K: NotificationSink> Dispatcher<T, K> {
    /// Create a dispatcher.
    pub fn new(subscriptions: T, sink: K) -> Self {
        Self {
            subscriptions,
            sink,
        }
    }

    /// Deliver every pair of the batch.
    ///
    /// Subscribers are served in id order and each subscriber's issues in
    /// batch order. A failing pair never stops the rest of the batch.
    pub async fn dispatch(&self, batch: NotificationBatch) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (subscriber_id, issues) in batch {
            let mut progress: BTreeMap<FeedId, Progress> = BTreeMap::new();

            for issue in issues {
                let entry = progress.entry(issue.feed.clone()).or_default();
                match self.sink.notify(subscriber_id, &issue).await {
                    Ok(()) => {
                        report.delivered += 1;
                        entry.delivered.push(issue.number);
                    }
                    Err(e) => {
                        warn!(
                            "Failed to notify subscriber {} about {}#{}: {}",
                            subscriber_id, issue.feed, issue.number, e
                        );
                        report.failed += 1;
                        entry.lowest_failed = Some(
                            entry
                                .lowest_failed
                                .map_or(issue.number, |n| n.min(issue.number)),
                        );
                    }
                }
            }

            for (feed, progress) in progress {
                self.commit(subscriber_id, &feed, &progress, &mut report)
                    .await;
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                "Dispatched {} notification(s), {} failed",
                report.delivered, report.failed
            );
        }

        report
    }

    async fn commit(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        progress: &Progress,
        report: &mut DispatchReport,
    ) {
        let Some(number) = progress.commit_point() else {
            return;
        };

        match self
            .subscriptions
            .advance_watermark(subscriber_id, feed, number)
            .await
        {
            Ok(true) => {
                report.watermarks_advanced += 1;
                debug!(
                    "Watermark of subscriber {} on {} moved to #{}",
                    subscriber_id, feed, number
                );
            }
            Ok(false) => {
                debug!(
                    "Watermark of subscriber {} on {} already at or past #{}",
                    subscriber_id, feed, number
                );
            }
            Err(e) => {
                report.watermark_errors += 1;
                error!(
                    "Failed to advance watermark of subscriber {} on {}: {}",
                    subscriber_id, feed, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::watch::memory::MemorySubscriptionStore;
    use crate::watch::test_support::RecordingSink;
    use crate::watch::types::{Issue, Subscription};

    fn feed(s: &str) -> FeedId {
        FeedId::parse(s).unwrap()
    }

    async fn store_with(subs: &[(SubscriberId, &str)]) -> Arc<MemorySubscriptionStore> {
        let store = Arc::new(MemorySubscriptionStore::new());
        for (id, f) in subs {
            store
                .insert(Subscription::new(*id, feed(f), BTreeSet::new()))
                .unwrap();
        }
        store
    }

    async fn watermark(store: &MemorySubscriptionStore, id: SubscriberId, f: &str) -> Option<i64> {
        store.get(id, &feed(f)).await.unwrap().unwrap().watermark
    }

    #[test]
    fn test_commit_point() {
        let progress = Progress {
            delivered: vec![14, 12, 10],
            lowest_failed: Some(13),
        };
        assert_eq!(progress.commit_point(), Some(12));

        let progress = Progress {
            delivered: vec![14],
            lowest_failed: Some(13),
        };
        assert_eq!(progress.commit_point(), None);

        let progress = Progress {
            delivered: vec![3, 5],
            lowest_failed: None,
        };
        assert_eq!(progress.commit_point(), Some(5));
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_batch_order_and_advances() {
        let store = store_with(&[(1, "a/a")]).await;
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::new(store.clone(), sink.clone());

        let mut batch = NotificationBatch::new();
        batch.push(1, Issue::new(feed("a/a"), 11, "eleven"));
        batch.push(1, Issue::new(feed("a/a"), 10, "ten"));

        let report = dispatcher.dispatch(batch).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.watermarks_advanced, 1);
        assert_eq!(sink.numbers_for(1), vec![11, 10]);
        assert_eq!(watermark(&store, 1, "a/a").await, Some(11));
    }

    #[tokio::test]
    async fn test_dispatch_failure_holds_watermark_below_failed_item() {
        let store = store_with(&[(1, "a/a")]).await;
        let sink = Arc::new(RecordingSink::new());
        sink.fail_on(1, 11);
        let dispatcher = Dispatcher::new(store.clone(), sink.clone());

        let mut batch = NotificationBatch::new();
        batch.push(1, Issue::new(feed("a/a"), 12, "twelve"));
        batch.push(1, Issue::new(feed("a/a"), 11, "eleven"));
        batch.push(1, Issue::new(feed("a/a"), 10, "ten"));

        let report = dispatcher.dispatch(batch).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(watermark(&store, 1, "a/a").await, Some(10));
    }

    #[tokio::test]
    async fn test_dispatch_isolates_subscribers() {
        let store = store_with(&[(1, "a/a"), (2, "a/a")]).await;
        let sink = Arc::new(RecordingSink::new());
        sink.fail_on(1, 5);
        let dispatcher = Dispatcher::new(store.clone(), sink.clone());

        let mut batch = NotificationBatch::new();
        batch.push(1, Issue::new(feed("a/a"), 5, "five"));
        batch.push(2, Issue::new(feed("a/a"), 5, "five"));

        let report = dispatcher.dispatch(batch).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(watermark(&store, 1, "a/a").await, None);
        assert_eq!(watermark(&store, 2, "a/a").await, Some(5));
    }

    #[tokio::test]
    async fn test_dispatch_tracks_feeds_separately() {
        let store = store_with(&[(1, "a/a"), (1, "b/b")]).await;
        let sink = Arc::new(RecordingSink::new());
        sink.fail_on(1, 3);
        let dispatcher = Dispatcher::new(store.clone(), sink.clone());

        let mut batch = NotificationBatch::new();
        batch.push(1, Issue::new(feed("a/a"), 3, "a3"));
        batch.push(1, Issue::new(feed("b/b"), 7, "b7"));

        dispatcher.dispatch(batch).await;

        assert_eq!(watermark(&store, 1, "a/a").await, None);
        assert_eq!(watermark(&store, 1, "b/b").await, Some(7));
    }

    #[tokio::test]
    async fn test_dispatch_to_removed_subscription_does_not_fail() {
        let store = Arc::new(MemorySubscriptionStore::new());
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::new(store.clone(), sink.clone());

        let mut batch = NotificationBatch::new();
        batch.push(9, Issue::new(feed("a/a"), 1, "one"));

        let report = dispatcher.dispatch(batch).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.watermarks_advanced, 0);
        assert_eq!(report.watermark_errors, 0);
    }

    #[tokio::test]
    async fn test_dispatch_empty_batch() {
        let dispatcher = Dispatcher::new(
            MemorySubscriptionStore::new(),
            RecordingSink::new(),
        );
        assert_eq!(
            dispatcher.dispatch(NotificationBatch::new()).await,
            DispatchReport::default()
        );
    }
}
