//! Database schema and migrations for issuewatch.
//!
//! Migrations are applied in order when the database is opened. The
//! schema_version table tracks which ones have already run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Subscriptions, keyed by (subscriber, feed)
    r#"
CREATE TABLE subscriptions (
    subscriber_id   INTEGER NOT NULL,
    feed            TEXT NOT NULL,               -- 'owner/name', case preserved
    labels          TEXT NOT NULL DEFAULT '[]',  -- JSON array, empty = match all
    watermark       INTEGER,                     -- last delivered issue number
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (subscriber_id, feed)
);

CREATE INDEX idx_subscriptions_feed ON subscriptions(feed);
"#,
    // v2: Issue ledger, one row per (feed, number)
    r#"
CREATE TABLE issues (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    feed        TEXT NOT NULL,
    number      INTEGER NOT NULL,
    title       TEXT NOT NULL,
    body        TEXT,
    html_url    TEXT NOT NULL,
    state       TEXT NOT NULL,
    labels      TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    fetched_at  TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (feed, number)
);

CREATE INDEX idx_issues_feed ON issues(feed);
"#,
];
