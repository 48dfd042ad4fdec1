//! issuewatch - GitHub issue watcher
//!
//! Polls the issue lists of watched repositories and notifies subscribers
//! about new issues matching their label filters.

pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod watch;

pub use command::{parse_command, Command, CommandHandler};
pub use config::Config;
pub use db::{Database, DbPool};
pub use error::{DispatchError, FetchError, Result, WatchError};
pub use watch::{
    CancellationFlag, Detection, DispatchReport, Dispatcher, FeedId, FeedSource, GitHubClient,
    Issue, IssueRepository, IssueStore, LogSink, NotificationBatch, NotificationSink, Reconciler,
    Scheduler, SubscriberId, Subscription, SubscriptionRepository, SubscriptionService,
    SubscriptionStore, TickReport, UpdateDetector,
};
