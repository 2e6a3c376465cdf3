//! SQL migration definitions for the Scorchbook database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: tastings, enrichment_cache",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tasting records. The full record lives in record_json; the other
-- columns mirror the fields list filters run against.
CREATE TABLE IF NOT EXISTS tastings (
    id          TEXT PRIMARY KEY,
    status      TEXT,
    name        TEXT NOT NULL DEFAULT '',
    style       TEXT NOT NULL DEFAULT '',
    score       REAL,
    heat_user   REAL,
    date        TEXT NOT NULL DEFAULT '',
    created_by  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    record_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tastings_date ON tastings(date);
CREATE INDEX IF NOT EXISTS idx_tastings_created_at ON tastings(created_at);

-- LLM extraction cache
CREATE TABLE IF NOT EXISTS enrichment_cache (
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Fixed-window rate limit counters for the LLM proxy",
            sql: r#"
CREATE TABLE IF NOT EXISTS rate_limits (
    key        TEXT PRIMARY KEY,
    count      INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rate_limits_expires ON rate_limits(expires_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
