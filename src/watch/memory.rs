//! In-memory subscription and issue stores.
//!
//! Thread-safe implementations of the store traits for embedded use and tests.
//! Subscriptions live in a single table keyed by [`SubscriptionKey`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::store::{IssueStore, SubscriptionStore};
use super::types::{FeedId, Issue, SubscriberId, Subscription, SubscriptionKey};
use crate::{Result, WatchError};

fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| WatchError::Database(format!("poisoned lock: {context}")))
}

/// In-memory subscription table.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<BTreeMap<SubscriptionKey, Subscription>>,
}

impl MemorySubscriptionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription as-is, replacing any row with the same key.
    pub fn insert(&self, subscription: Subscription) -> Result<()> {
        lock(&self.rows, "subscriptions")?.insert(subscription.key(), subscription);
        Ok(())
    }
}

impl SubscriptionStore for MemorySubscriptionStore {
    async fn subscribe(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        labels: &BTreeSet<String>,
    ) -> Result<Subscription> {
        let mut rows = lock(&self.rows, "subscriptions")?;
        let key = SubscriptionKey::new(subscriber_id, feed.clone());
        let subscription = rows
            .entry(key)
            .and_modify(|existing| {
                existing.labels = labels.clone();
                existing.updated_at = Utc::now();
            })
            .or_insert_with(|| Subscription::new(subscriber_id, feed.clone(), labels.clone()));
        Ok(subscription.clone())
    }

    async fn unsubscribe(&self, subscriber_id: SubscriberId, feed: &FeedId) -> Result<bool> {
        let mut rows = lock(&self.rows, "subscriptions")?;
        Ok(rows
            .remove(&SubscriptionKey::new(subscriber_id, feed.clone()))
            .is_some())
    }

    async fn get(&self, subscriber_id: SubscriberId, feed: &FeedId) -> Result<Option<Subscription>> {
        let rows = lock(&self.rows, "subscriptions")?;
        Ok(rows
            .get(&SubscriptionKey::new(subscriber_id, feed.clone()))
            .cloned())
    }

    async fn list(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        let rows = lock(&self.rows, "subscriptions")?;
        let mut subs: Vec<Subscription> = rows
            .values()
            .filter(|s| s.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.feed.cmp(&b.feed));
        Ok(subs)
    }

    async fn all(&self) -> Result<Vec<Subscription>> {
        let rows = lock(&self.rows, "subscriptions")?;
        let mut subs: Vec<Subscription> = rows.values().cloned().collect();
        subs.sort_by(|a, b| {
            a.feed
                .cmp(&b.feed)
                .then(a.subscriber_id.cmp(&b.subscriber_id))
        });
        Ok(subs)
    }

    async fn advance_watermark(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        number: i64,
    ) -> Result<bool> {
        let mut rows = lock(&self.rows, "subscriptions")?;
        match rows.get_mut(&SubscriptionKey::new(subscriber_id, feed.clone())) {
            Some(sub) if sub.watermark.map_or(true, |current| current < number) => {
                sub.watermark = Some(number);
                sub.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory issue ledger.
#[derive(Debug, Default)]
pub struct MemoryIssueStore {
    seen: Mutex<HashSet<(FeedId, i64)>>,
}

impl MemoryIssueStore {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded issues.
    pub fn len(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IssueStore for MemoryIssueStore {
    async fn exists(&self, feed: &FeedId, number: i64) -> Result<bool> {
        let seen = lock(&self.seen, "issues")?;
        Ok(seen.contains(&(feed.clone(), number)))
    }

    async fn insert(&self, issue: &Issue) -> Result<bool> {
        let mut seen = lock(&self.seen, "issues")?;
        Ok(seen.insert((issue.feed.clone(), issue.number)))
    }
}
