//! GitHub issues client.
//!
//! Implements [`FeedSource`] on top of the REST issues endpoint with
//! pagination, timeouts and response size limits.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::store::FeedSource;
use super::types::{FeedId, Issue};
use crate::config::GitHubConfig;
use crate::error::FetchError;
use crate::{Result, WatchError};

/// REST API version pinned in every request.
const API_VERSION: &str = "2022-11-28";

/// Media type requested from the API.
const MEDIA_TYPE: &str = "application/vnd.github+json";

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Issue as returned by the REST API.
#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: i64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    state: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Present when the entry is a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

/// GitHub issues fetcher.
pub struct GitHubClient {
    client: Client,
    api_url: Url,
    token: Option<String>,
    per_page: u32,
    max_pages: u32,
    max_response_bytes: u64,
}

impl GitHubClient {
    /// Create a client from the GitHub section of the configuration.
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| WatchError::Config(format!("invalid GitHub API URL: {e}")))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| WatchError::Config(format!("failed to create HTTP client: {e}")))?;

        let token = Some(config.token.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Self {
            client,
            api_url,
            token,
            per_page: config.per_page,
            max_pages: config.max_pages.max(1),
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// URL of one page of the newest-first issue listing of a repository.
    pub fn issues_url(&self, feed: &FeedId, page: u32) -> std::result::Result<Url, FetchError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Permanent(format!("API URL cannot be a base: {}", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", feed.owner(), feed.name(), "issues"]);
        url.query_pairs_mut()
            .append_pair("state", "all")
            .append_pair("sort", "created")
            .append_pair("direction", "desc")
            .append_pair("per_page", &self.per_page.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Download one listing page, enforcing the response size limit.
    async fn get_page(&self, url: Url) -> std::result::Result<Vec<GitHubIssue>, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to fetch issues: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_response_bytes {
                return Err(too_large(content_length, self.max_response_bytes));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to read response: {e}")))?;

        if bytes.len() as u64 > self.max_response_bytes {
            return Err(too_large(bytes.len() as u64, self.max_response_bytes));
        }

        parse_page(&bytes)
    }
}

impl FeedSource for GitHubClient {
    /// Walks pages newest first until one reaches back to `since`.
    ///
    /// Running out of pages before that point is a transient error, so the
    /// caller never sees a listing with a gap above its watermark. A feed
    /// that was never checked (`since == 0`) instead keeps what the page
    /// cap allowed.
    async fn fetch_since(
        &self,
        feed: &FeedId,
        since: i64,
    ) -> std::result::Result<Vec<Issue>, FetchError> {
        let mut issues = Vec::new();

        for page in 1..=self.max_pages {
            let url = self.issues_url(feed, page)?;
            debug!(feed = %feed, since, page, "fetching issues");

            let entries = self.get_page(url).await?;
            let last = is_last_page(&entries, self.per_page, since);
            issues.extend(select_issues(feed, entries, since));
            if last {
                return Ok(issues);
            }
        }

        if since > 0 {
            return Err(FetchError::Transient(format!(
                "more than {} pages of new entries since #{}",
                self.max_pages, since
            )));
        }
        debug!(
            "Initial fetch of {} stopped after {} pages ({} issues)",
            feed,
            self.max_pages,
            issues.len()
        );
        Ok(issues)
    }
}

/// Map an unsuccessful status to a fetch error kind.
fn classify_status(status: StatusCode) -> FetchError {
    let message = format!("HTTP error: {status}");
    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::GONE
        | StatusCode::UNPROCESSABLE_ENTITY => FetchError::Permanent(message),
        _ => FetchError::Transient(message),
    }
}

fn too_large(size: u64, max: u64) -> FetchError {
    FetchError::Transient(format!("response too large: {size} bytes (max {max} bytes)"))
}

fn parse_page(bytes: &[u8]) -> std::result::Result<Vec<GitHubIssue>, FetchError> {
    serde_json::from_slice(bytes)
        .map_err(|e| FetchError::Permanent(format!("failed to parse issues: {e}")))
}

/// Whether the listing can stop after this page.
///
/// Pull requests share the issue numbering, so they count when checking
/// whether the page reached `since`.
fn is_last_page(entries: &[GitHubIssue], per_page: u32, since: i64) -> bool {
    entries.len() < per_page as usize || entries.iter().any(|entry| entry.number <= since)
}

/// Drop pull requests and issues at or below `since`.
fn select_issues(feed: &FeedId, entries: Vec<GitHubIssue>, since: i64) -> Vec<Issue> {
    entries
        .into_iter()
        .filter(|issue| issue.pull_request.is_none() && issue.number > since)
        .map(|issue| Issue {
            feed: feed.clone(),
            number: issue.number,
            title: issue.title,
            body: issue.body,
            html_url: issue.html_url,
            state: issue.state,
            labels: issue.labels.into_iter().map(|label| label.name).collect(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        })
        .collect()
}
