//! Subscription service for issuewatch.
//!
//! Validates operator input before handing it to a [`SubscriptionStore`].

use std::collections::BTreeSet;

use super::store::SubscriptionStore;
use super::types::{parse_labels, FeedId, SubscriberId, Subscription};
use crate::{Result, WatchError};

/// Maximum number of labels in one filter.
pub const MAX_LABELS: usize = 20;

/// Maximum length of a label name (in characters).
pub const MAX_LABEL_LENGTH: usize = 50;

/// Validate a parsed label filter.
fn validate_labels(labels: &BTreeSet<String>) -> Result<()> {
    if labels.len() > MAX_LABELS {
        return Err(WatchError::Validation(format!(
            "too many labels (at most {})",
            MAX_LABELS
        )));
    }
    if let Some(label) = labels
        .iter()
        .find(|label| label.chars().count() > MAX_LABEL_LENGTH)
    {
        return Err(WatchError::Validation(format!(
            "label is too long (at most {} characters): {}",
            MAX_LABEL_LENGTH, label
        )));
    }
    Ok(())
}

/// High-level subscription operations.
pub struct SubscriptionService<T> {
    store: T,
}

impl<T: SubscriptionStore> SubscriptionService<T> {
    /// Create a service over a subscription store.
    pub fn new(store: T) -> Self {
        Self { store }
    }

    /// Subscribe to a repository, optionally filtered by a comma separated
    /// label list.
    ///
    /// Subscribing again replaces the filter and keeps the watermark, so
    /// issues already delivered are not delivered again.
    pub async fn subscribe(
        &self,
        subscriber_id: SubscriberId,
        repository: &str,
        labels: &str,
    ) -> Result<Subscription> {
        let feed = FeedId::parse(repository)?;
        let labels = parse_labels(labels);
        validate_labels(&labels)?;
        self.store.subscribe(subscriber_id, &feed, &labels).await
    }

    /// Unsubscribe from a repository. Returns false if there was nothing to
    /// remove.
    pub async fn unsubscribe(&self, subscriber_id: SubscriberId, repository: &str) -> Result<bool> {
        let feed = FeedId::parse(repository)?;
        self.store.unsubscribe(subscriber_id, &feed).await
    }

    /// Get one subscription.
    pub async fn get(&self, subscriber_id: SubscriberId, repository: &str) -> Result<Subscription> {
        let feed = FeedId::parse(repository)?;
        self.store
            .get(subscriber_id, &feed)
            .await?
            .ok_or_else(|| WatchError::NotFound(format!("subscription to {}", feed)))
    }

    /// Subscriptions of one subscriber, ordered by repository.
    pub async fn list(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        self.store.list(subscriber_id).await
    }

    /// Every subscription.
    pub async fn all(&self) -> Result<Vec<Subscription>> {
        self.store.all().await
    }

    /// Move a watermark forward. Returns false if nothing changed.
    pub async fn advance_watermark(
        &self,
        subscriber_id: SubscriberId,
        repository: &str,
        number: i64,
    ) -> Result<bool> {
        let feed = FeedId::parse(repository)?;
        self.store
            .advance_watermark(subscriber_id, &feed, number)
            .await
    }
}
