//! Test helpers for end-to-end tests.
//!
//! Provides a scripted feed source, a recording sink, an engine wired to an
//! in-memory database and a minimal HTTP stub for the GitHub client.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use issuewatch::config::WatchConfig;
use issuewatch::watch::{
    FeedId, FeedSource, Issue, IssueRepository, NotificationSink, Reconciler, SubscriberId,
    SubscriptionRepository,
};
use issuewatch::{Database, DispatchError, FetchError};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse a feed id, panicking on bad input.
pub fn feed(s: &str) -> FeedId {
    FeedId::parse(s).unwrap()
}

/// Issue with the given labels.
pub fn issue(feed_id: &str, number: i64, labels: &[&str]) -> Issue {
    Issue::new(feed(feed_id), number, format!("Issue #{number}"))
        .with_labels(labels.iter().copied())
        .with_html_url(format!("https://github.com/{feed_id}/issues/{number}"))
}

/// Feed source answering from a fixed script.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<HashMap<FeedId, Result<Vec<Issue>, FetchError>>>,
    calls: Mutex<Vec<(FeedId, i64)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_issues(&self, feed_id: &str, issues: Vec<Issue>) {
        self.responses
            .lock()
            .unwrap()
            .insert(feed(feed_id), Ok(issues));
    }

    pub fn set_error(&self, feed_id: &str, err: FetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(feed(feed_id), Err(err));
    }

    pub fn calls_for(&self, feed_id: &str) -> Vec<i64> {
        let target = feed(feed_id);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| *f == target)
            .map(|(_, since)| *since)
            .collect()
    }
}

impl FeedSource for ScriptedSource {
    async fn fetch_since(&self, feed_id: &FeedId, since: i64) -> Result<Vec<Issue>, FetchError> {
        self.calls.lock().unwrap().push((feed_id.clone(), since));
        self.responses
            .lock()
            .unwrap()
            .get(feed_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Sink recording deliveries, failing on chosen (subscriber, number) pairs.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(SubscriberId, Issue)>>,
    failing: Mutex<HashSet<(SubscriberId, i64)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, subscriber_id: SubscriberId, number: i64) {
        self.failing.lock().unwrap().insert((subscriber_id, number));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn received(&self, subscriber_id: SubscriberId) -> Vec<(String, i64)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == subscriber_id)
            .map(|(_, issue)| (issue.feed.to_string(), issue.number))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl NotificationSink for RecordingSink {
    async fn notify(&self, subscriber_id: SubscriberId, issue: &Issue) -> Result<(), DispatchError> {
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(subscriber_id, issue.number))
        {
            return Err(DispatchError::Unavailable("scripted outage".into()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((subscriber_id, issue.clone()));
        Ok(())
    }
}

pub type TestReconciler = Reconciler<
    Arc<ScriptedSource>,
    SubscriptionRepository,
    IssueRepository,
    Arc<RecordingSink>,
>;

/// Engine wired to an in-memory database.
pub struct TestEngine {
    pub db: Database,
    pub source: Arc<ScriptedSource>,
    pub sink: Arc<RecordingSink>,
    pub subscriptions: SubscriptionRepository,
    pub issues: IssueRepository,
    pub reconciler: Arc<TestReconciler>,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(WatchConfig::default()).await
    }

    pub async fn with_config(config: WatchConfig) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let source = Arc::new(ScriptedSource::new());
        let sink = Arc::new(RecordingSink::new());
        let subscriptions = SubscriptionRepository::new(db.pool());
        let issues = IssueRepository::new(db.pool());
        let reconciler = Arc::new(Reconciler::new(
            source.clone(),
            subscriptions.clone(),
            issues.clone(),
            sink.clone(),
            &config,
        ));
        Self {
            db,
            source,
            sink,
            subscriptions,
            issues,
            reconciler,
        }
    }
}

/// Canned HTTP response served by [`StubServer`].
#[derive(Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP/1.1 server answering from a list of routes.
///
/// A route matches when its pattern occurs in the request line; the first
/// match wins and unmatched requests get a 404.
pub struct StubServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    /// Serve the same response to every request.
    pub async fn start(status: u16, body: impl Into<String>) -> Self {
        Self::start_routes(vec![("", status, body.into())]).await
    }

    pub async fn start_routes(routes: Vec<(&str, u16, String)>) -> Self {
        let routes: Arc<Vec<(String, StubResponse)>> = Arc::new(
            routes
                .into_iter()
                .map(|(pattern, status, body)| (pattern.to_string(), StubResponse { status, body }))
                .collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head).into_owned();
                    let request_line = head.lines().next().unwrap_or_default().to_string();
                    recorded.lock().unwrap().push(head);

                    let response = routes
                        .iter()
                        .find(|(pattern, _)| request_line.contains(pattern.as_str()))
                        .map(|(_, response)| response.clone())
                        .unwrap_or(StubResponse {
                            status: 404,
                            body: r#"{"message": "Not Found"}"#.to_string(),
                        });

                    let reply = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        response.status,
                        response.body.len(),
                        response.body
                    );
                    let _ = stream.write_all(reply.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Raw request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}
