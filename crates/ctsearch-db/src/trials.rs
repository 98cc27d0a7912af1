//! Trial record store.
//!
//! Reads source records from the AACT `ctgov` schema and keeps processing
//! state and tags in the `ctsearch` schema.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, warn};

use ctsearch_core::{
    Eligibility, Error, Intervention, ProcessingState, Result, StoreStats, TagSet, TrialRecord,
    TrialStore,
};

use crate::pool::{log_pool_metrics, parse_database_url, LazyPool, PoolConfig};
use crate::tags;

/// Columns selected for a [`TrialRecord`], with child rows folded into JSON
/// so a batch is fetched in one round trip. Expects `ctgov.studies` as `s`.
pub(crate) const TRIAL_COLUMNS: &str = r#"
    s.nct_id,
    s.brief_title,
    s.official_title,
    s.phase,
    s.overall_status,
    s.study_type,
    (SELECT b.description FROM ctgov.brief_summaries b
      WHERE b.nct_id = s.nct_id ORDER BY b.id LIMIT 1) AS brief_summary,
    (SELECT d.description FROM ctgov.detailed_descriptions d
      WHERE d.nct_id = s.nct_id ORDER BY d.id LIMIT 1) AS detailed_description,
    COALESCE((SELECT jsonb_agg(c.name ORDER BY c.id) FROM ctgov.conditions c
      WHERE c.nct_id = s.nct_id), '[]'::jsonb) AS conditions,
    COALESCE((SELECT jsonb_agg(jsonb_build_object(
        'intervention_type', i.intervention_type,
        'name', i.name,
        'description', i.description) ORDER BY i.id)
      FROM ctgov.interventions i WHERE i.nct_id = s.nct_id), '[]'::jsonb) AS interventions,
    (SELECT jsonb_build_object(
        'criteria', e.criteria,
        'gender', e.gender,
        'minimum_age', e.minimum_age,
        'maximum_age', e.maximum_age)
      FROM ctgov.eligibilities e WHERE e.nct_id = s.nct_id ORDER BY e.id LIMIT 1) AS eligibility
"#;

fn trial_from_row(row: &PgRow) -> Result<TrialRecord> {
    let conditions: Json<Vec<Option<String>>> = row.try_get("conditions")?;
    let interventions: Json<Vec<Intervention>> = row.try_get("interventions")?;
    let eligibility: Option<Json<Eligibility>> = row.try_get("eligibility")?;

    Ok(TrialRecord {
        nct_id: row.try_get("nct_id")?,
        brief_title: row.try_get("brief_title")?,
        official_title: row.try_get("official_title")?,
        brief_summary: row.try_get("brief_summary")?,
        detailed_description: row.try_get("detailed_description")?,
        phase: row.try_get("phase")?,
        overall_status: row.try_get("overall_status")?,
        study_type: row.try_get("study_type")?,
        conditions: conditions.0.into_iter().flatten().collect(),
        interventions: interventions.0,
        eligibility: eligibility.map(|e| e.0).unwrap_or_default(),
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// PostgreSQL implementation of [`TrialStore`].
pub struct PgTrialStore {
    pool: LazyPool,
}

impl PgTrialStore {
    /// Create a store that connects on first use.
    pub fn new(connect_options: PgConnectOptions, config: PoolConfig) -> Self {
        Self {
            pool: LazyPool::new(connect_options, config),
        }
    }

    /// Create a store from a `postgres://` URL with the default pool config.
    pub fn from_url(database_url: &str) -> Result<Self> {
        Ok(Self::new(
            parse_database_url(database_url)?,
            PoolConfig::default(),
        ))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: LazyPool::from_pool(pool),
        }
    }

    /// Get the pool, connecting if needed. Concurrent first callers share a
    /// single pool.
    pub async fn connect(&self) -> Result<PgPool> {
        self.pool.connect().await
    }

    /// Close the pool. The next call reconnects.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Apply the `ctsearch` schema migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.connect().await?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        tracing::info!(
            subsystem = "db",
            component = "trials",
            op = "migrate",
            "Schema migrations applied"
        );
        Ok(())
    }

    /// Read back every tag stored for a record.
    pub async fn load_tags(&self, nct_id: &str) -> Result<TagSet> {
        let pool = self.connect().await?;
        tags::load(&pool, nct_id).await
    }

    /// The processing-state row for a record, if any.
    pub async fn processing_state(&self, nct_id: &str) -> Result<Option<ProcessingState>> {
        let pool = self.connect().await?;
        let row = sqlx::query(
            r#"
            SELECT nct_id, successfully_processed, processing_version, processed_at
            FROM ctsearch.processed_trials
            WHERE nct_id = $1
            "#,
        )
        .bind(nct_id)
        .fetch_optional(&pool)
        .await
        .map_err(Error::from_store)?;

        row.map(|row| -> Result<ProcessingState> {
            Ok(ProcessingState {
                nct_id: row.try_get("nct_id")?,
                successfully_processed: row.try_get("successfully_processed")?,
                processing_version: row.try_get("processing_version")?,
                processed_at: row.try_get("processed_at")?,
            })
        })
        .transpose()
    }

    /// Counts over the source studies and the processing state.
    pub async fn stats(&self) -> Result<StoreStats> {
        let pool = self.connect().await?;
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ctgov.studies) AS total_trials,
                COUNT(pt.nct_id) AS processed,
                COUNT(pt.nct_id) FILTER (WHERE pt.successfully_processed) AS succeeded,
                COUNT(pt.nct_id) FILTER (WHERE NOT pt.successfully_processed) AS failed,
                (SELECT COUNT(*) FROM ctgov.studies s
                  WHERE NOT EXISTS (SELECT 1 FROM ctsearch.processed_trials p
                                     WHERE p.nct_id = s.nct_id)) AS unprocessed
            FROM ctsearch.processed_trials pt
            "#,
        )
        .fetch_one(&pool)
        .await
        .map_err(Error::from_store)?;

        Ok(StoreStats {
            total_trials: row.try_get("total_trials")?,
            processed: row.try_get("processed")?,
            succeeded: row.try_get("succeeded")?,
            failed: row.try_get("failed")?,
            unprocessed: row.try_get("unprocessed")?,
        })
    }

    async fn fetch_trials(
        &self,
        op: &'static str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<TrialRecord>> {
        let start = Instant::now();
        let pool = self.connect().await?;
        let rows = query.fetch_all(&pool).await.map_err(Error::from_store)?;
        let trials = rows.iter().map(trial_from_row).collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "db",
            component = "trials",
            op,
            result_count = trials.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched trial batch"
        );
        log_pool_metrics(&pool);
        Ok(trials)
    }
}

#[async_trait]
impl TrialStore for PgTrialStore {
    async fn find_unprocessed(&self, limit: usize) -> Result<Vec<TrialRecord>> {
        let sql = format!(
            r#"
            SELECT {TRIAL_COLUMNS}
            FROM ctgov.studies s
            LEFT JOIN ctsearch.processed_trials pt ON pt.nct_id = s.nct_id
            WHERE pt.nct_id IS NULL
            ORDER BY s.nct_id
            LIMIT $1
            "#
        );
        self.fetch_trials("find_unprocessed", sqlx::query(&sql).bind(sql_limit(limit)))
            .await
    }

    async fn find_failed(
        &self,
        limit: usize,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<TrialRecord>> {
        let sql = format!(
            r#"
            SELECT {TRIAL_COLUMNS}
            FROM ctgov.studies s
            JOIN ctsearch.processed_trials pt ON pt.nct_id = s.nct_id
            WHERE pt.successfully_processed = FALSE
              AND pt.processed_at < $2
            ORDER BY s.nct_id
            LIMIT $1
            "#
        );
        self.fetch_trials(
            "find_failed",
            sqlx::query(&sql)
                .bind(sql_limit(limit))
                .bind(attempted_before),
        )
        .await
    }

    async fn mark_processed(
        &self,
        nct_id: &str,
        success: bool,
        processing_version: i32,
    ) -> Result<()> {
        let pool = self.connect().await?;
        sqlx::query(
            r#"
            INSERT INTO ctsearch.processed_trials
                (nct_id, successfully_processed, processing_version, processed_at)
            VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            ON CONFLICT (nct_id) DO UPDATE SET
                successfully_processed = EXCLUDED.successfully_processed,
                processing_version = EXCLUDED.processing_version,
                processed_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(nct_id)
        .bind(success)
        .bind(processing_version)
        .execute(&pool)
        .await
        .map_err(Error::from_store)?;

        debug!(
            subsystem = "db",
            component = "trials",
            op = "mark_processed",
            nct_id,
            success,
            processing_version,
            "Recorded processing state"
        );
        Ok(())
    }

    async fn save_tags(&self, nct_id: &str, tags: &TagSet) -> Result<()> {
        let start = Instant::now();
        let pool = self.connect().await?;
        let mut tx = pool.begin().await.map_err(Error::from_store)?;

        if let Err(e) = tags::write_all(&mut tx, nct_id, tags).await {
            warn!(
                subsystem = "db",
                component = "trials",
                op = "save_tags",
                nct_id,
                error = %e,
                "Tag write failed, rolling back"
            );
            if let Err(rollback_err) = tx.rollback().await {
                debug!(
                    subsystem = "db",
                    component = "trials",
                    op = "save_tags",
                    nct_id,
                    error = %rollback_err,
                    "Rollback failed; connection drop discards the transaction"
                );
            }
            return Err(e);
        }

        tx.commit().await.map_err(Error::from_store)?;

        debug!(
            subsystem = "db",
            component = "trials",
            op = "save_tags",
            nct_id,
            conditions = tags.conditions.len(),
            mechanisms = tags.mechanisms.len(),
            targets = tags.targets.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tags saved"
        );
        Ok(())
    }
}
