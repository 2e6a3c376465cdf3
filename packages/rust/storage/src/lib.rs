//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding tasting records,
//! the LLM extraction cache, and the proxy's rate-limit windows. Uploaded
//! photos and voice notes live on disk in a [`MediaStore`].
//!
//! **Access rules:**
//! - API server and job worker: read-write via [`Storage::open`]
//! - Ad-hoc CLI listing: read-only via [`Storage::open_readonly`]

pub mod media;
mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Value, params};
use scorchbook_shared::{ListFilters, Result, ScorchbookError, TastingId, TastingRecord};

pub use media::{
    MediaPayload, MediaStore, StoredMedia, infer_mime_type_from_key, media_extension,
    normalize_mime_type, parse_base64_data,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Outcome of a rate-limit window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request fits; `count` is the window's count including it.
    Allowed { count: u32 },
    /// The window is full.
    Exceeded,
}

fn storage_err(e: impl std::fmt::Display) -> ScorchbookError {
    ScorchbookError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScorchbookError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ScorchbookError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ScorchbookError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasting operations
    // -----------------------------------------------------------------------

    /// Insert a new tasting. Fails if the id already exists.
    pub async fn create_tasting(&self, record: &TastingRecord) -> Result<()> {
        self.write_tasting(record, "INSERT INTO").await
    }

    /// Insert or replace a tasting.
    pub async fn put_tasting(&self, record: &TastingRecord) -> Result<()> {
        self.write_tasting(record, "INSERT OR REPLACE INTO").await
    }

    async fn write_tasting(&self, record: &TastingRecord, verb: &str) -> Result<()> {
        self.check_writable()?;
        let json = serde_json::to_string(record).map_err(storage_err)?;
        let id = record.id.to_string();
        let status = record.status.map(|s| s.as_str());
        let created_at = record.created_at.to_rfc3339();
        let updated_at = record.updated_at.to_rfc3339();
        let sql = format!(
            "{verb} tastings (id, status, name, style, score, heat_user, date, created_by, created_at, updated_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        );
        self.conn
            .execute(
                &sql,
                params![
                    id.as_str(),
                    status,
                    record.name.as_str(),
                    record.style.as_str(),
                    record.score,
                    record.heat_user,
                    record.date.as_str(),
                    record.created_by.as_deref(),
                    created_at.as_str(),
                    updated_at.as_str(),
                    json.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a tasting by id.
    pub async fn get_tasting(&self, id: &TastingId) -> Result<Option<TastingRecord>> {
        let id = id.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT record_json FROM tastings WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_tasting(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Delete a tasting. Returns whether a row was removed.
    pub async fn delete_tasting(&self, id: &TastingId) -> Result<bool> {
        self.check_writable()?;
        let id = id.to_string();
        let affected = self
            .conn
            .execute("DELETE FROM tastings WHERE id = ?1", params![id.as_str()])
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }

    /// List tastings matching every present filter, newest first.
    ///
    /// `name`/`style` are case-sensitive substring matches; score and heat
    /// bounds exclude records where the field is null.
    pub async fn list_tastings(&self, filters: &ListFilters) -> Result<Vec<TastingRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut push = |clause: &str, value: Value| {
            values.push(value);
            clauses.push(clause.replace('?', &format!("?{}", values.len())));
        };

        if let Some(name) = filters.name.as_deref().filter(|s| !s.is_empty()) {
            push("instr(name, ?) > 0", Value::Text(name.to_string()));
        }
        if let Some(style) = filters.style.as_deref().filter(|s| !s.is_empty()) {
            push("instr(style, ?) > 0", Value::Text(style.to_string()));
        }
        if let Some(v) = filters.min_score {
            push("score >= ?", Value::Real(v));
        }
        if let Some(v) = filters.max_score {
            push("score <= ?", Value::Real(v));
        }
        if let Some(v) = filters.min_heat {
            push("heat_user >= ?", Value::Real(v));
        }
        if let Some(v) = filters.max_heat {
            push("heat_user <= ?", Value::Real(v));
        }
        if let Some(date) = filters.date.as_deref().filter(|s| !s.is_empty()) {
            push("date = ?", Value::Text(date.to_string()));
        }

        let mut sql = String::from("SELECT record_json FROM tastings");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut rows = self
            .conn
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_tasting(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Enrichment cache operations
    // -----------------------------------------------------------------------

    /// Get a cached extraction result.
    pub async fn get_enrichment_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM enrichment_cache
                 WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let result: String = row.get(0).map_err(storage_err)?;
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store an extraction result in the cache (upserts).
    pub async fn set_enrichment_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO enrichment_cache (prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![prompt_hash, model_id, result_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop every cached extraction.
    pub async fn clear_enrichment_cache(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM enrichment_cache", params![])
            .await
            .map_err(storage_err)
    }

    // -----------------------------------------------------------------------
    // Rate limit windows
    // -----------------------------------------------------------------------

    /// Count one request against `key` unless the window already holds
    /// `limit` requests. A new window always admits its first request and
    /// expires `ttl_secs` after it was opened.
    pub async fn increment_rate_limit(
        &self,
        key: &str,
        limit: u32,
        ttl_secs: i64,
    ) -> Result<RateLimitDecision> {
        self.check_writable()?;
        let now = Utc::now().timestamp();

        self.conn
            .execute(
                "DELETE FROM rate_limits WHERE expires_at < ?1",
                params![now],
            )
            .await
            .map_err(storage_err)?;

        let mut rows = self
            .conn
            .query(
                "INSERT INTO rate_limits (key, count, expires_at) VALUES (?1, 1, ?3)
                 ON CONFLICT(key) DO UPDATE SET count = rate_limits.count + 1
                 WHERE rate_limits.count < ?2
                 RETURNING count",
                params![key, limit, now + ttl_secs],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let count: u32 = row.get(0).map_err(storage_err)?;
                Ok(RateLimitDecision::Allowed { count })
            }
            None => Ok(RateLimitDecision::Exceeded),
        }
    }
}

/// Convert a database row (`record_json` in column 0) to a [`TastingRecord`].
fn row_to_tasting(row: &libsql::Row) -> Result<TastingRecord> {
    let json: String = row.get(0).map_err(storage_err)?;
    serde_json::from_str(&json)
        .map_err(|e| ScorchbookError::Storage(format!("invalid tasting record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorchbook_shared::ProcessingStatus;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("sb_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn record(name: &str, style: &str, score: Option<f64>, heat: Option<f64>) -> TastingRecord {
        let mut r = TastingRecord::pending(TastingId::new(), Utc::now());
        r.name = name.into();
        r.style = style.into();
        r.score = score;
        r.heat_user = heat;
        r
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sb_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn tasting_crud() {
        let storage = test_storage().await;
        let mut r = record("Garlic Reaper", "Garlic", Some(8.0), Some(4.0));
        r.created_by = Some("user-1".into());

        storage.create_tasting(&r).await.expect("create");
        assert!(storage.create_tasting(&r).await.is_err(), "duplicate id");

        let found = storage.get_tasting(&r.id).await.expect("get").expect("present");
        assert_eq!(found, r);

        r.status = Some(ProcessingStatus::Complete);
        r.maker = "Reaper Co".into();
        storage.put_tasting(&r).await.expect("put");
        let found = storage.get_tasting(&r.id).await.unwrap().unwrap();
        assert_eq!(found.status, Some(ProcessingStatus::Complete));
        assert_eq!(found.maker, "Reaper Co");

        assert!(storage.delete_tasting(&r.id).await.expect("delete"));
        assert!(storage.get_tasting(&r.id).await.unwrap().is_none());
        assert!(!storage.delete_tasting(&r.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters() {
        let storage = test_storage().await;
        let mut a = record("Mango Habanero", "Fruity", Some(9.0), Some(3.0));
        a.date = "2024-06-01".into();
        let b = record("Ghost Pepper Garlic", "Garlic", Some(6.0), Some(5.0));
        let c = record("Mystery", "Fruity", None, None);
        for r in [&a, &b, &c] {
            storage.create_tasting(r).await.unwrap();
        }

        let all = storage.list_tastings(&ListFilters::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let fruity = storage
            .list_tastings(&ListFilters {
                style: Some("Fruit".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fruity.len(), 2);

        let high = storage
            .list_tastings(&ListFilters {
                min_score: Some(7.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, a.id);

        let hot = storage
            .list_tastings(&ListFilters {
                name: Some("Garlic".into()),
                min_heat: Some(4.0),
                max_heat: Some(5.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].id, b.id);

        let dated = storage
            .list_tastings(&ListFilters {
                date: Some("2024-06-01".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(dated.len(), 1);

        // Case-sensitive like the record store it replaces.
        let lower = storage
            .list_tastings(&ListFilters {
                name: Some("mango".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(lower.is_empty());
    }

    #[tokio::test]
    async fn enrichment_cache() {
        let storage = test_storage().await;

        let cached = storage
            .get_enrichment_cache("hash1", "claude-3-haiku")
            .await
            .expect("get cache miss");
        assert!(cached.is_none());

        storage
            .set_enrichment_cache("hash1", "claude-3-haiku", r#"{"name": "test"}"#)
            .await
            .expect("set cache");

        let cached = storage
            .get_enrichment_cache("hash1", "claude-3-haiku")
            .await
            .expect("get cache hit");
        assert!(cached.unwrap().contains("test"));

        // Different model is a different entry.
        assert!(
            storage
                .get_enrichment_cache("hash1", "other-model")
                .await
                .unwrap()
                .is_none()
        );

        assert_eq!(storage.clear_enrichment_cache().await.unwrap(), 1);
        assert!(
            storage
                .get_enrichment_cache("hash1", "claude-3-haiku")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn rate_limit_window() {
        let storage = test_storage().await;
        let key = "user-1#202401011200";

        for expected in 1..=3 {
            let decision = storage.increment_rate_limit(key, 3, 120).await.unwrap();
            assert_eq!(decision, RateLimitDecision::Allowed { count: expected });
        }
        let decision = storage.increment_rate_limit(key, 3, 120).await.unwrap();
        assert_eq!(decision, RateLimitDecision::Exceeded);

        // Other users have their own window.
        let decision = storage
            .increment_rate_limit("user-2#202401011200", 3, 120)
            .await
            .unwrap();
        assert_eq!(decision, RateLimitDecision::Allowed { count: 1 });
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("sb_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        let r = record("A", "B", None, None);
        rw.create_tasting(&r).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_tasting(&r.id).await.unwrap().is_some());
        let result = ro.put_tasting(&r).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
