//! One reconciliation pass over every subscription.
//!
//! A tick lists all subscriptions, checks each watched feed once, merges the
//! matches into a single batch and hands it to the dispatcher. Ticks never
//! overlap: a tick requested while another one runs does nothing. Feed health
//! has its own lock, so reading it never counts as a running tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::detector::{Detection, UpdateDetector};
use super::dispatcher::Dispatcher;
use super::store::{FeedSource, IssueStore, NotificationSink, SubscriptionStore};
use super::types::{FeedId, NotificationBatch, Subscription};
use crate::config::WatchConfig;
use crate::error::FetchError;

/// Cooperative cancellation signal for a running tick.
///
/// Checked before each feed is started; a feed already being checked runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create a flag that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Distinct feeds watched.
    pub feeds: usize,
    /// Feeds whose fetch failed.
    pub feeds_failed: usize,
    /// Subscriptions considered.
    pub subscriptions: usize,
    /// Issues stored for the first time.
    pub new_items: usize,
    /// Notifications delivered.
    pub delivered: usize,
    /// Notifications the sink refused.
    pub delivery_failures: usize,
    /// Whether cancellation cut the tick short.
    pub cancelled: bool,
}

/// Consecutive fetch failures per feed.
#[derive(Debug, Default)]
struct FeedHealth {
    failures: HashMap<FeedId, u32>,
}

impl FeedHealth {
    fn record_success(&mut self, feed: &FeedId) {
        if let Some(count) = self.failures.remove(feed) {
            info!("Feed {} recovered after {} failed check(s)", feed, count);
        }
    }

    fn record_failure(&mut self, feed: &FeedId, err: &FetchError, threshold: u32) -> u32 {
        let count = self.failures.entry(feed.clone()).or_insert(0);
        *count += 1;

        if *count >= threshold {
            error!(
                "Feed {} failed {} consecutive time(s): {}",
                feed, *count, err
            );
        } else {
            warn!("Failed to check feed {} (attempt {}): {}", feed, *count, err);
        }
        *count
    }

    fn count(&self, feed: &FeedId) -> u32 {
        self.failures.get(feed).copied().unwrap_or(0)
    }
}

/// Runs reconciliation ticks.
pub struct Reconciler<S, T, I, K> {
    subscriptions: T,
    detector: UpdateDetector<S, I>,
    dispatcher: Dispatcher<T, K>,
    running: Mutex<()>,
    health: Mutex<FeedHealth>,
    max_concurrent_fetches: usize,
    max_consecutive_errors: u32,
}

impl<S, T, I, K> Reconciler<S, T, I, K>
where
    S: FeedSource,
    T: SubscriptionStore + Clone,
    I: IssueStore,
    K: NotificationSink,
{
    /// Create a reconciler from its collaborators.
    pub fn new(source: S, subscriptions: T, issues: I, sink: K, config: &WatchConfig) -> Self {
        Self {
            detector: UpdateDetector::new(source, issues),
            dispatcher: Dispatcher::new(subscriptions.clone(), sink),
            subscriptions,
            running: Mutex::new(()),
            health: Mutex::new(FeedHealth::default()),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
        }
    }

    /// Consecutive failed checks of a feed, zero when healthy.
    pub async fn consecutive_failures(&self, feed: &FeedId) -> u32 {
        self.health.lock().await.count(feed)
    }

    /// Run one tick.
    ///
    /// Returns `None` without doing anything when another tick is in progress.
    pub async fn tick(&self, cancel: &CancellationFlag) -> Option<TickReport> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Tick already in progress, skipping");
            return None;
        };

        let mut report = TickReport::default();

        let subscriptions = match self.subscriptions.all().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("Failed to list subscriptions: {}", e);
                return Some(report);
            }
        };

        report.subscriptions = subscriptions.len();
        let groups = group_by_feed(subscriptions);
        report.feeds = groups.len();
        self.health
            .lock()
            .await
            .failures
            .retain(|feed, _| groups.contains_key(feed));

        if groups.is_empty() {
            debug!("No subscriptions to check");
            return Some(report);
        }

        debug!(
            "Checking {} feed(s) for {} subscription(s)",
            report.feeds, report.subscriptions
        );

        let checks: Vec<_> = groups
            .into_iter()
            .map(|(feed, subs)| self.check_feed(feed, subs, cancel))
            .collect();
        let mut outcomes: Vec<(FeedId, Option<Result<Detection, FetchError>>)> =
            stream::iter(checks)
                .buffer_unordered(self.max_concurrent_fetches)
                .collect()
                .await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut batch = NotificationBatch::new();
        let mut health = self.health.lock().await;
        for (feed, outcome) in outcomes {
            match outcome {
                Some(Ok(detection)) => {
                    health.record_success(&feed);
                    report.new_items += detection.stored;
                    batch.merge(detection.matches);
                }
                Some(Err(e)) => {
                    report.feeds_failed += 1;
                    health.record_failure(&feed, &e, self.max_consecutive_errors);
                }
                None => report.cancelled = true,
            }
        }
        drop(health);

        let dispatched = self.dispatcher.dispatch(batch).await;
        report.delivered = dispatched.delivered;
        report.delivery_failures = dispatched.failed;

        if report.cancelled {
            info!("Tick cancelled: {} notification(s) delivered", report.delivered);
        } else if report.new_items > 0 || report.delivered > 0 || report.feeds_failed > 0 {
            info!(
                "Tick finished: {} feed(s), {} failed, {} new issue(s), {} notification(s)",
                report.feeds, report.feeds_failed, report.new_items, report.delivered
            );
        } else {
            debug!("Tick finished: nothing new in {} feed(s)", report.feeds);
        }

        Some(report)
    }

    async fn check_feed(
        &self,
        feed: FeedId,
        subscriptions: Vec<Subscription>,
        cancel: &CancellationFlag,
    ) -> (FeedId, Option<Result<Detection, FetchError>>) {
        if cancel.is_cancelled() {
            debug!("Skipping feed {}: tick cancelled", feed);
            return (feed, None);
        }
        let outcome = self.detector.detect(&feed, &subscriptions).await;
        (feed, Some(outcome))
    }
}

/// Group subscriptions by the feed they watch.
pub fn group_by_feed(subscriptions: Vec<Subscription>) -> BTreeMap<FeedId, Vec<Subscription>> {
    let mut groups: BTreeMap<FeedId, Vec<Subscription>> = BTreeMap::new();
    for subscription in subscriptions {
        groups
            .entry(subscription.feed.clone())
            .or_default()
            .push(subscription);
    }
    groups
}
