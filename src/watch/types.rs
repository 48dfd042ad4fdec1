//! Watch types for issuewatch.

use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::WatchError;

/// Subscriber identifier (the chat the notifications go to).
pub type SubscriberId = i64;

/// Repository identifier in `owner/name` form.
///
/// Case is preserved as given; two ids differing only in case are different
/// feeds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedId(String);

impl FeedId {
    /// Parse and validate an `owner/name` identifier.
    pub fn parse(s: &str) -> Result<Self, WatchError> {
        let s = s.trim();
        let (owner, name) = s.split_once('/').ok_or_else(|| {
            WatchError::Validation(format!("repository must be in owner/repo form: {s:?}"))
        })?;

        for part in [owner, name] {
            if part.is_empty() || part.contains('/') || part.chars().any(char::is_whitespace) {
                return Err(WatchError::Validation(format!(
                    "repository must be in owner/repo form: {s:?}"
                )));
            }
        }

        Ok(Self(s.to_string()))
    }

    /// The repository owner.
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(owner, _)| owner).unwrap_or("")
    }

    /// The repository name.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, name)| name).unwrap_or("")
    }

    /// The full `owner/name` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FeedId {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An issue reported by a feed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Repository the issue belongs to.
    pub feed: FeedId,
    /// Issue number, increasing within a repository.
    pub number: i64,
    /// Issue title.
    pub title: String,
    /// Issue body.
    pub body: Option<String>,
    /// Link to the issue page.
    pub html_url: String,
    /// Issue state (open, closed).
    pub state: String,
    /// Label names.
    pub labels: BTreeSet<String>,
    /// When the issue was created.
    pub created_at: DateTime<Utc>,
    /// When the issue was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// Create an open issue with no labels.
    pub fn new(feed: FeedId, number: i64, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            feed,
            number,
            title: title.into(),
            body: None,
            html_url: String::new(),
            state: "open".to_string(),
            labels: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the labels.
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the page URL.
    pub fn with_html_url(mut self, url: impl Into<String>) -> Self {
        self.html_url = url.into();
        self
    }

    /// Set the state.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }
}

/// Composite storage key of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    /// Subscriber.
    pub subscriber_id: SubscriberId,
    /// Watched repository.
    pub feed: FeedId,
}

impl SubscriptionKey {
    /// Create a key.
    pub fn new(subscriber_id: SubscriberId, feed: FeedId) -> Self {
        Self {
            subscriber_id,
            feed,
        }
    }
}

/// A subscriber's interest in one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Subscriber.
    pub subscriber_id: SubscriberId,
    /// Watched repository.
    pub feed: FeedId,
    /// Label filter; empty matches every issue.
    pub labels: BTreeSet<String>,
    /// Number of the last issue delivered, `None` if nothing was delivered yet.
    pub watermark: Option<i64>,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a fresh subscription with no watermark.
    pub fn new(subscriber_id: SubscriberId, feed: FeedId, labels: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            subscriber_id,
            feed,
            labels,
            watermark: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the watermark.
    pub fn with_watermark(mut self, watermark: i64) -> Self {
        self.watermark = Some(watermark);
        self
    }

    /// Storage key of this subscription.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.subscriber_id, self.feed.clone())
    }

    /// Watermark with "never checked" mapped to zero.
    pub fn watermark_or_zero(&self) -> i64 {
        self.watermark.unwrap_or(0)
    }

    /// Whether the label filter accepts the issue.
    pub fn accepts_labels(&self, issue: &Issue) -> bool {
        self.labels.is_empty() || !self.labels.is_disjoint(&issue.labels)
    }

    /// Whether the issue should be delivered to this subscriber.
    ///
    /// The issue must be past the watermark and pass the label filter.
    pub fn matches(&self, issue: &Issue) -> bool {
        issue.feed == self.feed && issue.number > self.watermark_or_zero() && self.accepts_labels(issue)
    }
}

/// Issues to deliver in one tick, grouped by subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationBatch {
    entries: BTreeMap<SubscriberId, Vec<Issue>>,
}

impl NotificationBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one issue to a subscriber's list.
    pub fn push(&mut self, subscriber_id: SubscriberId, issue: Issue) {
        self.entries.entry(subscriber_id).or_default().push(issue);
    }

    /// Append several issues to a subscriber's list, keeping their order.
    pub fn extend_for(&mut self, subscriber_id: SubscriberId, issues: impl IntoIterator<Item = Issue>) {
        let mut issues = issues.into_iter().peekable();
        if issues.peek().is_some() {
            self.entries.entry(subscriber_id).or_default().extend(issues);
        }
    }

    /// Move every entry of `other` into this batch.
    pub fn merge(&mut self, other: NotificationBatch) {
        for (subscriber_id, issues) in other.entries {
            self.extend_for(subscriber_id, issues);
        }
    }

    /// Issues queued for a subscriber.
    pub fn get(&self, subscriber_id: SubscriberId) -> Option<&[Issue]> {
        self.entries.get(&subscriber_id).map(Vec::as_slice)
    }

    /// Number of subscribers with at least one issue.
    pub fn subscriber_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of (subscriber, issue) pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether the batch holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over subscribers and their issues.
    pub fn iter(&self) -> btree_map::Iter<'_, SubscriberId, Vec<Issue>> {
        self.entries.iter()
    }
}

impl IntoIterator for NotificationBatch {
    type Item = (SubscriberId, Vec<Issue>);
    type IntoIter = btree_map::IntoIter<SubscriberId, Vec<Issue>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Parse a comma separated label list.
///
/// Labels are trimmed and empty fragments are dropped.
pub fn parse_labels(s: &str) -> BTreeSet<String> {
    s.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}
