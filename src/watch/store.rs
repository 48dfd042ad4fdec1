//! Collaborator traits of the watch engine.
//!
//! The engine only talks to the outside world through these traits: a feed
//! source to poll, two stores for subscriptions and seen issues, and a sink
//! for outgoing notifications. SQLite, in-memory and GitHub implementations
//! live in sibling modules.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use crate::error::{DispatchError, FetchError};
use crate::watch::types::{FeedId, Issue, SubscriberId, Subscription};
use crate::Result;

/// Source of issues for a repository.
pub trait FeedSource: Send + Sync {
    /// Fetch issues with a number greater than `since`.
    ///
    /// Items are returned in source order. Callers must not rely on the
    /// source having filtered precisely; `since` is only a hint.
    fn fetch_since(
        &self,
        feed: &FeedId,
        since: i64,
    ) -> impl Future<Output = std::result::Result<Vec<Issue>, FetchError>> + Send;
}

/// Durable mapping of (subscriber, feed) to filter and watermark.
///
/// Every method is atomic on its own.
pub trait SubscriptionStore: Send + Sync {
    /// Create or update a subscription.
    ///
    /// An existing subscription keeps its watermark; only the label filter is
    /// replaced.
    fn subscribe(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        labels: &BTreeSet<String>,
    ) -> impl Future<Output = Result<Subscription>> + Send;

    /// Remove a subscription. Returns false if there was none.
    fn unsubscribe(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Look up a single subscription.
    fn get(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
    ) -> impl Future<Output = Result<Option<Subscription>>> + Send;

    /// Subscriptions of one subscriber, ordered by feed.
    fn list(
        &self,
        subscriber_id: SubscriberId,
    ) -> impl Future<Output = Result<Vec<Subscription>>> + Send;

    /// Every subscription, ordered by feed then subscriber.
    fn all(&self) -> impl Future<Output = Result<Vec<Subscription>>> + Send;

    /// Move the watermark forward to `number`.
    ///
    /// Returns false without touching anything when the subscription does not
    /// exist or its watermark is already at or past `number`.
    fn advance_watermark(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        number: i64,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Ledger of issues already seen, unique per (feed, number).
pub trait IssueStore: Send + Sync {
    /// Whether the issue is already recorded.
    fn exists(&self, feed: &FeedId, number: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Record an issue. Returns false if it was already present.
    fn insert(&self, issue: &Issue) -> impl Future<Output = Result<bool>> + Send;
}

/// Outgoing notification channel.
pub trait NotificationSink: Send + Sync {
    /// Deliver one issue to one subscriber.
    fn notify(
        &self,
        subscriber_id: SubscriberId,
        issue: &Issue,
    ) -> impl Future<Output = std::result::Result<(), DispatchError>> + Send;
}

impl<T: FeedSource> FeedSource for Arc<T> {
    fn fetch_since(
        &self,
        feed: &FeedId,
        since: i64,
    ) -> impl Future<Output = std::result::Result<Vec<Issue>, FetchError>> + Send {
        (**self).fetch_since(feed, since)
    }
}

impl<T: SubscriptionStore> SubscriptionStore for Arc<T> {
    fn subscribe(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        labels: &BTreeSet<String>,
    ) -> impl Future<Output = Result<Subscription>> + Send {
        (**self).subscribe(subscriber_id, feed, labels)
    }

    fn unsubscribe(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
    ) -> impl Future<Output = Result<bool>> + Send {
        (**self).unsubscribe(subscriber_id, feed)
    }

    fn get(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
    ) -> impl Future<Output = Result<Option<Subscription>>> + Send {
        (**self).get(subscriber_id, feed)
    }

    fn list(
        &self,
        subscriber_id: SubscriberId,
    ) -> impl Future<Output = Result<Vec<Subscription>>> + Send {
        (**self).list(subscriber_id)
    }

    fn all(&self) -> impl Future<Output = Result<Vec<Subscription>>> + Send {
        (**self).all()
    }

    fn advance_watermark(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        number: i64,
    ) -> impl Future<Output = Result<bool>> + Send {
        (**self).advance_watermark(subscriber_id, feed, number)
    }
}

impl<T: IssueStore> IssueStore for Arc<T> {
    fn exists(&self, feed: &FeedId, number: i64) -> impl Future<Output = Result<bool>> + Send {
        (**self).exists(feed, number)
    }

    fn insert(&self, issue: &Issue) -> impl Future<Output = Result<bool>> + Send {
        (**self).insert(issue)
    }
}

impl<T: NotificationSink> NotificationSink for Arc<T> {
    fn notify(
        &self,
        subscriber_id: SubscriberId,
        issue: &Issue,
    ) -> impl Future<Output = std::result::Result<(), DispatchError>> + Send {
        (**self).notify(subscriber_id, issue)
    }
}
