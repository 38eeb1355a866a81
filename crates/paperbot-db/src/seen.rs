//! PostgreSQL seen-paper store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use tracing::{debug, info, instrument};

use paperbot_core::{Error, PaperId, Result, SeenPaperStore, SeenSet};

use crate::pool::{create_pool, log_pool_metrics};

/// Schema for the seen-paper table. Idempotent.
pub const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS seen_papers (
    paper_id TEXT PRIMARY KEY,
    first_seen_at TIMESTAMPTZ NOT NULL
)";

fn unavailable(op: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::StoreUnavailable(format!("seen_papers {}: {}", op, e))
}

/// PostgreSQL implementation of SeenPaperStore.
///
/// Commits run in a single transaction; a future dropped before the
/// transaction commits rolls it back.
#[derive(Clone)]
pub struct PgSeenStore {
    pool: Pool<Postgres>,
}

impl PgSeenStore {
    /// Create a store over an existing pool. Call [`Self::ensure_schema`] first
    /// on a fresh database.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect, create the table if needed, and return the store.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        log_pool_metrics(&store.pool);
        Ok(store)
    }

    /// Create the `seen_papers` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(unavailable("ensure_schema"))?;
        info!(
            subsystem = "store",
            component = "pg_store",
            op = "ensure_schema",
            "Seen-paper schema ready"
        );
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_strings(ids: &BTreeSet<PaperId>) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

#[async_trait]
impl SeenPaperStore for PgSeenStore {
    async fn load(&self) -> Result<SeenSet> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT paper_id, first_seen_at FROM seen_papers ORDER BY paper_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable("load"))?;

        let mut seen = SeenSet::new();
        for (id, at) in rows {
            seen.record(PaperId::new(id), at);
        }
        Ok(seen)
    }

    async fn has(&self, id: &PaperId) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM seen_papers WHERE paper_id = $1)")
                .bind(id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable("has"))?;
        Ok(exists)
    }

    #[instrument(skip(self, ids), fields(subsystem = "store", component = "pg_store", op = "commit", count = ids.len()))]
    async fn commit(&self, ids: &BTreeSet<PaperId>, at: DateTime<Utc>) -> Result<BTreeSet<PaperId>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut tx = self.pool.begin().await.map_err(unavailable("begin"))?;

        let inserted: Vec<(String,)> = sqlx::query_as(
            "INSERT INTO seen_papers (paper_id, first_seen_at)
             SELECT id, $2 FROM UNNEST($1::text[]) AS t(id)
             ON CONFLICT (paper_id) DO NOTHING
             RETURNING paper_id",
        )
        .bind(to_strings(ids))
        .bind(at)
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable("insert"))?;

        tx.commit().await.map_err(unavailable("commit"))?;

        let added: BTreeSet<PaperId> = inserted.into_iter().map(|(id,)| PaperId::new(id)).collect();
        debug!(added = added.len(), "Seen-paper commit durable");
        Ok(added)
    }

    async fn unseen(&self, ids: &BTreeSet<PaperId>) -> Result<BTreeSet<PaperId>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT t.id FROM UNNEST($1::text[]) AS t(id)
             WHERE NOT EXISTS (SELECT 1 FROM seen_papers s WHERE s.paper_id = t.id)",
        )
        .bind(to_strings(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable("unseen"))?;

        Ok(rows.into_iter().map(|(id,)| PaperId::new(id)).collect())
    }

    async fn len(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen_papers")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("len"))?;
        Ok(count.max(0) as usize)
    }
}
