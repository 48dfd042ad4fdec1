//! Issue watch module for issuewatch.
//!
//! This module detects new issues in watched repositories, matches them
//! against subscriptions and fans them out to subscribers.

pub mod detector;
pub mod dispatcher;
pub mod github;
pub mod memory;
pub mod reconciler;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod store;
pub mod types;

pub use detector::{fetch_boundary, Detection, UpdateDetector};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use github::GitHubClient;
pub use memory::{MemoryIssueStore, MemorySubscriptionStore};
pub use reconciler::{group_by_feed, CancellationFlag, Reconciler, TickReport};
pub use repository::{IssueRepository, SubscriptionRepository};
pub use scheduler::Scheduler;
pub use service::{SubscriptionService, MAX_LABELS, MAX_LABEL_LENGTH};
pub use sink::{format_notification, LogSink};
pub use store::{FeedSource, IssueStore, NotificationSink, SubscriptionStore};
pub use types::{
    parse_labels, FeedId, Issue, NotificationBatch, SubscriberId, Subscription, SubscriptionKey,
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::store::{FeedSource, NotificationSink};
    use super::types::{FeedId, Issue, SubscriberId};
    use crate::error::{DispatchError, FetchError};

    /// Feed source answering from a fixed script.
    ///
    /// Unknown feeds return no issues. Responses are not filtered by `since`.
    #[derive(Default)]
    pub struct ScriptedSource {
        responses: Mutex<HashMap<FeedId, Result<Vec<Issue>, FetchError>>>,
        calls: Mutex<Vec<(FeedId, i64)>>,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_issues(&self, feed: &FeedId, issues: Vec<Issue>) {
            self.responses.lock().unwrap().insert(feed.clone(), Ok(issues));
        }

        pub fn set_error(&self, feed: &FeedId, err: FetchError) {
            self.responses.lock().unwrap().insert(feed.clone(), Err(err));
        }

        pub fn calls(&self) -> Vec<(FeedId, i64)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, feed: &FeedId) -> usize {
            self.calls.lock().unwrap().iter().filter(|(f, _)| f == feed).count()
        }
    }

    impl FeedSource for ScriptedSource {
        async fn fetch_since(&self, feed: &FeedId, since: i64) -> Result<Vec<Issue>, FetchError> {
            self.calls.lock().unwrap().push((feed.clone(), since));
            self.responses
                .lock()
                .unwrap()
                .get(feed)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Sink recording every delivery, failing on chosen pairs.
    #[derive(Default)]
    pub struct RecordingSink {
        delivered: Mutex<Vec<(SubscriberId, FeedId, i64)>>,
        failing: Mutex<HashSet<(SubscriberId, i64)>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_on(&self, subscriber_id: SubscriberId, number: i64) {
            self.failing.lock().unwrap().insert((subscriber_id, number));
        }

        pub fn delivered(&self) -> Vec<(SubscriberId, FeedId, i64)> {
            self.delivered.lock().unwrap().clone()
        }

        pub fn numbers_for(&self, subscriber_id: SubscriberId) -> Vec<i64> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _, _)| *id == subscriber_id)
                .map(|(_, _, number)| *number)
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        async fn notify(&self, subscriber_id: SubscriberId, issue: &Issue) -> Result<(), DispatchError> {
            if self.failing.lock().unwrap().contains(&(subscriber_id, issue.number)) {
                return Err(DispatchError::Rejected("scripted failure".into()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((subscriber_id, issue.feed.clone(), issue.number));
            Ok(())
        }
    }
}
