//! SQLite repositories for subscriptions and issues.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::store::{IssueStore, SubscriptionStore};
use super::types::{FeedId, Issue, SubscriberId, Subscription};
use crate::db::DbPool;
use crate::{Result, WatchError};

const SUBSCRIPTION_COLUMNS: &str =
    "subscriber_id, feed, labels, watermark, created_at, updated_at";

const ISSUE_COLUMNS: &str =
    "feed, number, title, body, html_url, state, labels, created_at, updated_at";

/// Row type for a subscription from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    subscriber_id: i64,
    feed: String,
    labels: String,
    watermark: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = WatchError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Subscription {
            subscriber_id: row.subscriber_id,
            feed: stored_feed(&row.feed)?,
            labels: decode_labels(&row.labels)?,
            watermark: row.watermark,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        })
    }
}

/// Row type for an issue from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct IssueRow {
    feed: String,
    number: i64,
    title: String,
    body: Option<String>,
    html_url: String,
    state: String,
    labels: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<IssueRow> for Issue {
    type Error = WatchError;

    fn try_from(row: IssueRow) -> Result<Self> {
        Ok(Issue {
            feed: stored_feed(&row.feed)?,
            number: row.number,
            title: row.title,
            body: row.body,
            html_url: row.html_url,
            state: row.state,
            labels: decode_labels(&row.labels)?,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        })
    }
}

/// Repository for subscription operations.
#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: DbPool,
}

impl SubscriptionRepository {
    /// Create a new repository instance.
    pub fn new(pool: &DbPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// Count all subscriptions.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

impl SubscriptionStore for SubscriptionRepository {
    async fn subscribe(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        labels: &BTreeSet<String>,
    ) -> Result<Subscription> {
        let encoded = serde_json::to_string(labels)?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscriber_id, feed, labels)
            VALUES ($1, $2, $3)
            ON CONFLICT (subscriber_id, feed) DO UPDATE SET
                labels = excluded.labels,
                updated_at = datetime('now')
            "#,
        )
        .bind(subscriber_id)
        .bind(feed.as_str())
        .bind(&encoded)
        .execute(&self.pool)
        .await?;

        self.get(subscriber_id, feed)
            .await?
            .ok_or_else(|| WatchError::NotFound("subscription".into()))
    }

    async fn unsubscribe(&self, subscriber_id: SubscriberId, feed: &FeedId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = $1 AND feed = $2")
            .bind(subscriber_id)
            .bind(feed.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, subscriber_id: SubscriberId, feed: &FeedId) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscriber_id = $1 AND feed = $2"
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(subscriber_id)
            .bind(feed.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn list(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscriber_id = $1 ORDER BY feed ASC"
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(subscriber_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn all(&self) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY feed ASC, subscriber_id ASC"
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn advance_watermark(
        &self,
        subscriber_id: SubscriberId,
        feed: &FeedId,
        number: i64,
    ) -> Result<bool> {
        // Conditional so the watermark never moves backwards.
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET watermark = $1,
                updated_at = datetime('now')
            WHERE subscriber_id = $2 AND feed = $3
              AND (watermark IS NULL OR watermark < $4)
            "#,
        )
        .bind(number)
        .bind(subscriber_id)
        .bind(feed.as_str())
        .bind(number)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Repository for the issue ledger.
#[derive(Debug, Clone)]
pub struct IssueRepository {
    pool: DbPool,
}

impl IssueRepository {
    /// Create a new repository instance.
    pub fn new(pool: &DbPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// Get a stored issue.
    pub async fn get(&self, feed: &FeedId, number: i64) -> Result<Option<Issue>> {
        let query = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE feed = $1 AND number = $2");
        let row = sqlx::query_as::<_, IssueRow>(&query)
            .bind(feed.as_str())
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Issue::try_from).transpose()
    }

    /// Count stored issues of a feed.
    pub async fn count_by_feed(&self, feed: &FeedId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issues WHERE feed = $1")
            .bind(feed.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

impl IssueStore for IssueRepository {
    async fn exists(&self, feed: &FeedId, number: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM issues WHERE feed = $1 AND number = $2)")
                .bind(feed.as_str())
                .bind(number)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert(&self, issue: &Issue) -> Result<bool> {
        let labels = serde_json::to_string(&issue.labels)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO issues
                (feed, number, title, body, html_url, state, labels, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(issue.feed.as_str())
        .bind(issue.number)
        .bind(&issue.title)
        .bind(&issue.body)
        .bind(&issue.html_url)
        .bind(&issue.state)
        .bind(&labels)
        .bind(issue.created_at.to_rfc3339())
        .bind(issue.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn stored_feed(s: &str) -> Result<FeedId> {
    FeedId::parse(s).map_err(|e| WatchError::Database(format!("corrupt feed column {s:?}: {e}")))
}

fn decode_labels(s: &str) -> Result<BTreeSet<String>> {
    Ok(serde_json::from_str(s)?)
}

/// Parse a datetime string to DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}
