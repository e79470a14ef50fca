//! SQLite-backed analytic catalog.
//!
//! Every mode owns three tables: `ref_<mode>` (curated output, maintained downstream),
//! `raw_<mode>` (landing table, one row per flushed record) and `process_<mode>` (registry
//! of keys already attempted).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::dedup::{candidate_keys, CompletedKeySet, SortOrder};
use crate::models::{normalize_symbol, parse_date, EntityKey, ExtractionMode};
use crate::storage::{ArtifactStore, KeyLedger};

/// Rows per multi-row insert; SQLite caps bound parameters per statement
const RAW_INSERT_CHUNK: usize = 200;

#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open (creating if missing) the catalog database at `database_path`
    pub async fn new(database_path: &str) -> Result<Self> {
        let filename = database_path.strip_prefix("sqlite:").unwrap_or(database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(filename).create_if_missing(true))
            .await
            .with_context(|| format!("failed to open catalog {}", filename))?;

        // WAL lets readers proceed while a flush transaction is open
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

        info!("💾 Catalog opened at {}", filename);
        Ok(Self { pool })
    }

    /// Private in-memory catalog; a single connection so every query sees the same database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn table(prefix: &str, mode: ExtractionMode) -> String {
        format!("{}_{}", prefix, mode.as_str())
    }

    /// Create the three tables of `mode`. Safe to call repeatedly.
    pub async fn register_schema(&self, mode: ExtractionMode) -> Result<()> {
        let curated = Self::table("ref", mode);
        let raw = Self::table("raw", mode);
        let registry = Self::table("process", mode);

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {curated} (
                symbol TEXT NOT NULL,
                date TEXT,
                payload TEXT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {raw} (
                artifact TEXT NOT NULL,
                symbol TEXT,
                date TEXT,
                payload TEXT NOT NULL,
                loaded_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {registry} (
                symbol TEXT NOT NULL,
                date TEXT
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{raw}_artifact ON {raw}(artifact)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{registry}_key ON {registry}(symbol, date)"
        ))
        .execute(&self.pool)
        .await?;

        debug!("Schema registered for {}", mode);
        Ok(())
    }

    /// Copy landed rows into the curated table, the way the downstream build does
    pub async fn promote_raw_to_curated(&self, mode: ExtractionMode) -> Result<u64> {
        let sql = format!(
            "INSERT INTO {} (symbol, date, payload)
             SELECT symbol, date, payload FROM {} WHERE symbol IS NOT NULL",
            Self::table("ref", mode),
            Self::table("raw", mode),
        );
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Key rows (`symbol`, `date`) from `sql`, projected onto the key columns of `mode`
    async fn key_rows(&self, mode: ExtractionMode, sql: &str) -> Result<Vec<EntityKey>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let keys = rows
            .into_iter()
            .filter_map(|row| {
                let symbol: Option<String> = row.get("symbol");
                let date: Option<String> = row.get("date");
                let symbol = normalize_symbol(&symbol?);
                match mode {
                    ExtractionMode::HistoricalPriceFull => {
                        Some(EntityKey::with_date(symbol, parse_date(&date?)?))
                    }
                    _ => Some(EntityKey::symbol(symbol)),
                }
            })
            .collect();
        Ok(keys)
    }
}

#[async_trait]
impl ArtifactStore for CatalogStore {
    async fn ensure_location(&self, mode: ExtractionMode) -> Result<()> {
        self.register_schema(mode).await
    }

    async fn artifact_names(&self, mode: ExtractionMode) -> Result<Vec<String>> {
        let sql = format!("SELECT DISTINCT artifact FROM {}", Self::table("raw", mode));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| row.get::<String, _>("artifact")).collect())
    }

    async fn read_rows(&self, mode: ExtractionMode) -> Result<Vec<Value>> {
        let sql = format!("SELECT payload FROM {}", Self::table("raw", mode));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let payload: String = row.get("payload");
                serde_json::from_str(&payload).context("corrupt payload in raw table")
            })
            .collect()
    }

    async fn write_artifact(&self, mode: ExtractionMode, name: &str, rows: &[Value]) -> Result<()> {
        let table = Self::table("raw", mode);
        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(RAW_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO {} (artifact, symbol, date, payload) ", table));
            builder.push_values(chunk, |mut b, row| {
                let symbol = row
                    .get("symbol")
                    .and_then(Value::as_str)
                    .map(normalize_symbol);
                let date = row.get("date").and_then(Value::as_str).map(str::to_string);
                b.push_bind(name.to_string())
                    .push_bind(symbol)
                    .push_bind(date)
                    .push_bind(row.to_string());
            });
            builder.build().execute(&mut *tx).await?;
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl KeyLedger for CatalogStore {
    async fn candidate_keys(&self, mode: ExtractionMode, order: SortOrder) -> Result<Vec<EntityKey>> {
        self.register_schema(ExtractionMode::EarningCalendar).await?;
        let rows = self.read_rows(ExtractionMode::EarningCalendar).await?;
        Ok(candidate_keys(mode, &rows, order))
    }

    async fn completed_keys(&self, mode: ExtractionMode) -> Result<CompletedKeySet> {
        self.register_schema(mode).await?;
        let sql = format!(
            "SELECT symbol, date FROM {} UNION SELECT symbol, date FROM {}",
            Self::table("ref", mode),
            Self::table("process", mode),
        );
        Ok(self.key_rows(mode, &sql).await?.into_iter().collect())
    }

    /// Anti-join of the calendar landing table against curated output and registry
    async fn pending_keys(&self, mode: ExtractionMode, order: SortOrder) -> Result<Vec<EntityKey>> {
        self.register_schema(ExtractionMode::EarningCalendar).await?;
        self.register_schema(mode).await?;

        let calendar = Self::table("raw", ExtractionMode::EarningCalendar);
        let curated = Self::table("ref", mode);
        let registry = Self::table("process", mode);
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };

        let sql = match mode {
            ExtractionMode::HistoricalPriceFull => format!(
                r#"
                SELECT DISTINCT a.symbol AS symbol, substr(a.date, 1, 10) AS date
                FROM {calendar} a
                LEFT JOIN {curated} b ON a.symbol = b.symbol AND substr(a.date, 1, 10) = b.date
                LEFT JOIN {registry} c ON a.symbol = c.symbol AND substr(a.date, 1, 10) = c.date
                WHERE a.symbol IS NOT NULL AND a.date IS NOT NULL
                  AND b.symbol IS NULL
                  AND c.symbol IS NULL
                ORDER BY 1 {direction}, 2 {direction}
                "#
            ),
            _ => format!(
                r#"
                SELECT DISTINCT a.symbol AS symbol, NULL AS date
                FROM {calendar} a
                LEFT JOIN {curated} b ON a.symbol = b.symbol
                LEFT JOIN {registry} c ON a.symbol = c.symbol
                WHERE a.symbol IS NOT NULL
                  AND b.symbol IS NULL
                  AND c.symbol IS NULL
                ORDER BY a.symbol {direction}
                "#
            ),
        };

        self.key_rows(mode, &sql).await
    }

    async fn record(&self, mode: ExtractionMode, keys: &[EntityKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} (symbol, date) ",
            Self::table("process", mode)
        ));
        builder.push_values(keys, |mut b, key| {
            b.push_bind(key.symbol.clone())
                .push_bind(key.date.map(|date| date.to_string()));
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
