//! Update detection for a single feed.
//!
//! The detector fetches a feed once, records every fetched issue in the
//! issue store and works out which subscriber should receive which issue.

use tracing::{debug, error, warn};

use super::store::{FeedSource, IssueStore};
use super::types::{FeedId, Issue, NotificationBatch, Subscription};
use crate::error::FetchError;

/// Result of checking one feed.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Issues the issue store did not hold yet.
    pub new_items: Vec<Issue>,
    /// Issues to deliver, per subscriber, in source order.
    pub matches: NotificationBatch,
    /// Number of issues newly stored.
    pub stored: usize,
}

/// Fetches feeds and matches issues against subscriptions.
pub struct UpdateDetector<S, I> {
    source: S,
    issues: I,
}

impl<S: FeedSource, I: IssueStore> UpdateDetector<S, I> {
    /// Create a detector over a feed source and an issue store.
    pub fn new(source: S, issues: I) -> Self {
        Self { source, issues }
    }

    /// Check one feed for the given subscriptions.
    ///
    /// The source is queried exactly once, starting from the lowest watermark
    /// among the subscriptions. Subscriptions for other feeds are ignored.
    pub async fn detect(
        &self,
        feed: &FeedId,
        subscriptions: &[Subscription],
    ) -> Result<Detection, FetchError> {
        let since = fetch_boundary(subscriptions);
        debug!("Checking feed {} since #{}", feed, since);

        let fetched = self.source.fetch_since(feed, since).await?;

        let mut detection = Detection::default();
        let mut items = Vec::with_capacity(fetched.len());

        for issue in fetched {
            if &issue.feed != feed {
                warn!(
                    "Dropping issue #{} of {} returned for feed {}",
                    issue.number, issue.feed, feed
                );
                continue;
            }

            match self.issues.insert(&issue).await {
                Ok(true) => {
                    detection.stored += 1;
                    detection.new_items.push(issue.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to store issue #{} for feed {}: {}", issue.number, feed, e);
                }
            }

            items.push(issue);
        }

        for subscription in subscriptions.iter().filter(|s| &s.feed == feed) {
            detection.matches.extend_for(
                subscription.subscriber_id,
                items.iter().filter(|issue| subscription.matches(issue)).cloned(),
            );
        }

        debug!(
            "Feed {}: {} fetched, {} new, {} to deliver",
            feed,
            items.len(),
            detection.stored,
            detection.matches.len()
        );

        Ok(detection)
    }
}

/// Lowest watermark among the subscriptions, with "never checked" as zero.
pub fn fetch_boundary(subscriptions: &[Subscription]) -> i64 {
    subscriptions
        .iter()
        .map(Subscription::watermark_or_zero)
        .min()
        .unwrap_or(0)
}
