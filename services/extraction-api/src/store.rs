use crate::config::DatabaseConfig;
use crate::query::{push_where, FilterClause, TIMESTAMP_FORMAT};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, FromRow, QueryBuilder, Sqlite};
use tracing::{debug, info, instrument};

/// Default MIME type for new records
pub const DEFAULT_MIME_TYPE: &str = "application/pdf";
/// Default status for new records
pub const DEFAULT_STATUS: &str = "success";

/// Stored extraction record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Extraction {
    /// Storage-assigned identifier
    pub id: i64,
    /// Original file name
    pub filename: String,
    /// File size in bytes
    pub file_size: Option<i64>,
    pub mime_type: String,
    /// Free-form processing status
    pub status: String,
    /// Opaque JSON payload as text
    pub data_json: Option<String>,
    /// Insert time (UTC), serialized as `YYYY-MM-DD HH:MM:SS`
    #[serde(with = "crate::query::sqlite_timestamp")]
    pub extraction_date: NaiveDateTime,
}

/// Fields for a record about to be inserted
#[derive(Debug, Clone)]
pub struct NewExtraction {
    pub filename: String,
    pub file_size: Option<i64>,
    pub mime_type: String,
    pub status: String,
    pub data_json: Option<String>,
}

impl NewExtraction {
    /// A record with only a filename and default MIME type/status
    pub fn named(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            file_size: None,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            status: DEFAULT_STATUS.to_string(),
            data_json: None,
        }
    }
}

/// Raw aggregates behind the dashboard metrics
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct ExtractionStats {
    pub total: i64,
    pub this_week: i64,
    /// Mean of non-null `file_size`, `None` when no sized rows exist
    pub avg_file_size: Option<f64>,
    pub success_count: i64,
}

/// SQLite-backed extraction store
///
/// Holds connection options only. Every operation opens its own connection
/// and drops it before returning, on error paths included.
#[derive(Debug, Clone)]
pub struct ExtractionStore {
    options: SqliteConnectOptions,
}

const SELECT_EXTRACTIONS: &str = "SELECT id, filename, file_size, mime_type, status, data_json, extraction_date FROM extractions";

impl ExtractionStore {
    /// Create a store for the configured database file
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout());

        info!(path = %config.path.display(), "Using SQLite database");

        Self { options }
    }

    /// Open a fresh connection
    pub async fn connect(&self) -> Result<SqliteConnection> {
        self.options
            .connect()
            .await
            .context("Failed to open SQLite database")
    }

    /// Create tables if they do not exist yet
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        let mut conn = self.connect().await?;
        sqlx::migrate!("./migrations")
            .run(&mut conn)
            .await
            .context("Failed to run migrations")?;
        conn.close().await.context("Failed to close connection")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Check that the database can be opened and queried
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        sqlx::query("SELECT 1")
            .execute(&mut conn)
            .await
            .context("Failed to query database")?;
        conn.close().await.context("Failed to close connection")?;
        Ok(())
    }

    /// List records matching all clauses, newest first
    #[instrument(skip(self))]
    pub async fn list(&self, clauses: &[FilterClause]) -> Result<Vec<Extraction>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_EXTRACTIONS);
        push_where(&mut builder, clauses);
        builder.push(" ORDER BY extraction_date DESC, id DESC");

        let mut conn = self.connect().await?;
        let extractions = builder
            .build_query_as::<Extraction>()
            .fetch_all(&mut conn)
            .await
            .context("Failed to query extractions")?;
        conn.close().await.context("Failed to close connection")?;

        debug!(count = extractions.len(), "Listed extractions");
        Ok(extractions)
    }

    /// Insert a record and return its new id
    #[instrument(skip(self, new), fields(filename = %new.filename))]
    pub async fn insert(&self, new: &NewExtraction) -> Result<i64> {
        let mut conn = self.connect().await?;
        let id = sqlx::query(
            r#"
            INSERT INTO extractions (filename, file_size, mime_type, status, data_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.filename)
        .bind(new.file_size)
        .bind(&new.mime_type)
        .bind(&new.status)
        .bind(&new.data_json)
        .execute(&mut conn)
        .await
        .context("Failed to insert extraction")?
        .last_insert_rowid();
        conn.close().await.context("Failed to close connection")?;

        info!(id, "Extraction created");
        Ok(id)
    }

    /// Get a record by id
    pub async fn get(&self, id: i64) -> Result<Option<Extraction>> {
        let mut conn = self.connect().await?;
        let extraction = sqlx::query_as::<_, Extraction>(&format!("{SELECT_EXTRACTIONS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut conn)
            .await
            .context("Failed to query extraction")?;
        conn.close().await.context("Failed to close connection")?;

        Ok(extraction)
    }

    /// Delete a record by id, returning whether a row was removed
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let mut conn = self.connect().await?;
        let affected = sqlx::query("DELETE FROM extractions WHERE id = ?")
            .bind(id)
            .execute(&mut conn)
            .await
            .context("Failed to delete extraction")?
            .rows_affected();
        conn.close().await.context("Failed to close connection")?;

        if affected > 0 {
            info!(id, "Extraction deleted");
        }
        Ok(affected > 0)
    }

    /// Delete every record, returning how many were removed
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64> {
        let mut conn = self.connect().await?;
        let affected = sqlx::query("DELETE FROM extractions")
            .execute(&mut conn)
            .await
            .context("Failed to clear extractions")?
            .rows_affected();
        conn.close().await.context("Failed to close connection")?;

        info!(deleted_count = affected, "Cleared extractions");
        Ok(affected)
    }

    /// Aggregate counts and sizes over all records
    pub async fn stats(&self) -> Result<ExtractionStats> {
        let week_ago = Utc::now().naive_utc() - Duration::days(7);

        let mut conn = self.connect().await?;
        let stats = sqlx::query_as::<_, ExtractionStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN extraction_date >= ? THEN 1 ELSE 0 END), 0) AS this_week,
                AVG(file_size) AS avg_file_size,
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success_count
            FROM extractions
            "#,
        )
        .bind(week_ago.format(TIMESTAMP_FORMAT).to_string())
        .fetch_one(&mut conn)
        .await
        .context("Failed to get extraction stats")?;
        conn.close().await.context("Failed to close connection")?;

        Ok(stats)
    }

    /// Upsert the current total and a `last_updated` marker into `metrics`
    #[instrument(skip(self))]
    pub async fn record_metrics_snapshot(&self) -> Result<()> {
        let mut conn = self.connect().await?;

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM extractions")
            .fetch_one(&mut conn)
            .await
            .context("Failed to count extractions")?;

        let mut tx = conn.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO metrics (metric_name, metric_value, recorded_at)
            VALUES ('total_extractions', ?, CURRENT_TIMESTAMP)
            ON CONFLICT(metric_name) DO UPDATE
            SET metric_value = excluded.metric_value, recorded_at = excluded.recorded_at
            "#,
        )
        .bind(total.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to record total_extractions")?;

        sqlx::query(
            r#"
            INSERT INTO metrics (metric_name, metric_value, recorded_at)
            VALUES ('last_updated', datetime('now'), CURRENT_TIMESTAMP)
            ON CONFLICT(metric_name) DO UPDATE
            SET metric_value = excluded.metric_value, recorded_at = excluded.recorded_at
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("Failed to record last_updated")?;

        tx.commit().await.context("Failed to commit transaction")?;
        conn.close().await.context("Failed to close connection")?;

        debug!(total, "Metrics snapshot recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ExtractionQuery;
    use tempfile::TempDir;

    async fn test_store() -> (ExtractionStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ExtractionStore::new(&DatabaseConfig::at(dir.path().join("extractions.db")));
        store.run_migrations().await.unwrap();
        (store, dir)
    }

    async fn backdate(store: &ExtractionStore, id: i64, when: &str) {
        let mut conn = store.connect().await.unwrap();
        sqlx::query("UPDATE extractions SET extraction_date = ? WHERE id = ?")
            .bind(when)
            .bind(id)
            .execute(&mut conn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_applies_defaults() {
        let (store, _dir) = test_store().await;

        let id = store.insert(&NewExtraction::named("a.pdf")).await.unwrap();
        let extraction = store.get(id).await.unwrap().unwrap();

        assert_eq!(extraction.filename, "a.pdf");
        assert_eq!(extraction.mime_type, "application/pdf");
        assert_eq!(extraction.status, "success");
        assert_eq!(extraction.file_size, None);
        assert_eq!(extraction.data_json, None);
        assert!(extraction.extraction_date <= Utc::now().naive_utc() + Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (store, _dir) = test_store().await;

        let first = store.insert(&NewExtraction::named("a.pdf")).await.unwrap();
        let second = store.insert(&NewExtraction::named("a.pdf")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_none() {
        let (store, _dir) = test_store().await;

        let id = store.insert(&NewExtraction::named("a.pdf")).await.unwrap();
        assert!(store.delete(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let (store, _dir) = test_store().await;

        let old = store.insert(&NewExtraction::named("old.pdf")).await.unwrap();
        let mid = store.insert(&NewExtraction::named("mid.pdf")).await.unwrap();
        let new = store.insert(&NewExtraction::named("new.pdf")).await.unwrap();
        backdate(&store, old, "2024-01-01 08:00:00").await;
        backdate(&store, mid, "2024-01-02 08:00:00").await;
        backdate(&store, new, "2024-01-03 08:00:00").await;

        let ids: Vec<i64> = store.list(&[]).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![new, mid, old]);
    }

    #[tokio::test]
    async fn test_today_filter_excludes_old_records() {
        let (store, _dir) = test_store().await;

        let fresh = store.insert(&NewExtraction::named("fresh.pdf")).await.unwrap();
        let stale = store.insert(&NewExtraction::named("stale.pdf")).await.unwrap();
        let two_days_ago = Utc::now().naive_utc() - Duration::days(2);
        backdate(&store, stale, &two_days_ago.format(TIMESTAMP_FORMAT).to_string()).await;

        let query = ExtractionQuery {
            date_filter: Some("today".to_string()),
            ..Default::default()
        };
        let ids: Vec<i64> = store.list(&query.clauses()).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![fresh]);
    }

    #[tokio::test]
    async fn test_week_and_month_filters() {
        let (store, _dir) = test_store().await;

        let recent = store.insert(&NewExtraction::named("recent.pdf")).await.unwrap();
        let weeks_old = store.insert(&NewExtraction::named("weeks.pdf")).await.unwrap();
        let ancient = store.insert(&NewExtraction::named("ancient.pdf")).await.unwrap();
        let now = Utc::now().naive_utc();
        backdate(&store, weeks_old, &(now - Duration::days(14)).format(TIMESTAMP_FORMAT).to_string()).await;
        backdate(&store, ancient, &(now - Duration::days(60)).format(TIMESTAMP_FORMAT).to_string()).await;

        let week = ExtractionQuery {
            date_filter: Some("week".to_string()),
            ..Default::default()
        };
        let month = ExtractionQuery {
            date_filter: Some("month".to_string()),
            ..Default::default()
        };

        let week_ids: Vec<i64> = store.list(&week.clauses()).await.unwrap().iter().map(|e| e.id).collect();
        let month_ids: Vec<i64> = store.list(&month.clauses()).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(week_ids, vec![recent]);
        assert_eq!(month_ids, vec![recent, weeks_old]);
    }

    #[tokio::test]
    async fn test_search_matches_substring() {
        let (store, _dir) = test_store().await;

        store.insert(&NewExtraction::named("invoice_2024.pdf")).await.unwrap();
        store.insert(&NewExtraction::named("report.pdf")).await.unwrap();
        store.insert(&NewExtraction::named("invoice%draft.pdf")).await.unwrap();

        let found = store
            .list(&[FilterClause::FilenameContains("invoice".to_string())])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let literal = store
            .list(&[FilterClause::FilenameContains("%".to_string())])
            .await
            .unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].filename, "invoice%draft.pdf");
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _dir) = test_store().await;
        assert_eq!(store.stats().await.unwrap(), ExtractionStats::default());

        let mut sized = NewExtraction::named("a.pdf");
        sized.file_size = Some(1_048_576);
        store.insert(&sized).await.unwrap();

        let mut failed = NewExtraction::named("b.pdf");
        failed.status = "failed".to_string();
        let failed_id = store.insert(&failed).await.unwrap();
        backdate(&store, failed_id, "2020-01-01 00:00:00").await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.this_week, 1);
        assert_eq!(stats.avg_file_size, Some(1_048_576.0));
        assert_eq!(stats.success_count, 1);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let (store, _dir) = test_store().await;

        store.insert(&NewExtraction::named("a.pdf")).await.unwrap();
        store.insert(&NewExtraction::named("b.pdf")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.clear().await.unwrap(), 0);
        assert_eq!(store.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_upserts() {
        let (store, _dir) = test_store().await;

        store.insert(&NewExtraction::named("a.pdf")).await.unwrap();
        store.record_metrics_snapshot().await.unwrap();
        store.insert(&NewExtraction::named("b.pdf")).await.unwrap();
        store.record_metrics_snapshot().await.unwrap();

        let mut conn = store.connect().await.unwrap();
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT metric_name, metric_value FROM metrics ORDER BY metric_name")
                .fetch_all(&mut conn)
                .await
                .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "last_updated");
        assert!(rows[0].1.is_some());
        assert_eq!(rows[1], ("total_extractions".to_string(), Some("2".to_string())));
    }
}
