//! Notification text and the logging sink.

use tracing::info;

use super::store::NotificationSink;
use super::types::{Issue, SubscriberId};
use crate::error::DispatchError;

/// Render the message sent for a new issue.
pub fn format_notification(issue: &Issue) -> String {
    let labels: Vec<&str> = issue.labels.iter().map(String::as_str).collect();
    format!(
        "New issue in {}\nTitle: {}\nLabels: {}\nURL: {}",
        issue.feed,
        issue.title,
        labels.join(", "),
        issue.html_url
    )
}

/// Sink that writes every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl LogSink {
    /// Create a logging sink.
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for LogSink {
    async fn notify(&self, subscriber_id: SubscriberId, issue: &Issue) -> Result<(), DispatchError> {
        info!(
            subscriber = subscriber_id,
            "Notification\n{}",
            format_notification(issue)
        );
        Ok(())
    }
}
