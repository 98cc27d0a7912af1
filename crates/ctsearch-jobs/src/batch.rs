//! Batch driver: drains the store through the tagger until done.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use ctsearch_core::defaults;
use ctsearch_core::{Error, Result, TrialInput, TrialRecord, TrialStore, TrialTagger};

/// Which records a run selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Records with no processing-state row.
    #[default]
    Unprocessed,
    /// Records whose last attempt failed before this run started.
    RetryFailed,
}

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Records requested from the store per round.
    pub batch_size: usize,
    /// Stop after this many records. `None` drains the store.
    pub max_trials: Option<usize>,
    /// Version stamped on every processing-state row.
    pub processing_version: i32,
    /// Records tagged concurrently within a batch.
    pub concurrency: usize,
    pub selection: Selection,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_trials: None,
            processing_version: defaults::PROCESSING_VERSION,
            concurrency: defaults::BATCH_CONCURRENCY,
            selection: Selection::Unprocessed,
        }
    }
}

impl BatchConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `BATCH_SIZE` | `5` | Records per round |
    /// | `BATCH_MAX_TRIALS` | unset | Stop after this many records |
    /// | `BATCH_CONCURRENCY` | `1` | Concurrent tagging calls |
    /// | `PROCESSING_VERSION` | `1` | Version written to processing state |
    pub fn from_env() -> Self {
        let batch_size = std::env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::BATCH_SIZE);

        let max_trials = std::env::var("BATCH_MAX_TRIALS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let concurrency = std::env::var("BATCH_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::BATCH_CONCURRENCY)
            .max(1);

        let processing_version = std::env::var("PROCESSING_VERSION")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::PROCESSING_VERSION);

        Self {
            batch_size,
            max_trials,
            processing_version,
            concurrency,
            selection: Selection::Unprocessed,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_trials(mut self, max_trials: Option<usize>) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn with_processing_version(mut self, version: i32) -> Self {
        self.processing_version = version;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Reject settings that would make a run spin or stall.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records attempted; always `succeeded + failed`.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, success: bool) {
        self.processed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Event emitted by the batch driver.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A run started.
    RunStarted { run_id: Uuid },
    /// A batch of records was selected.
    BatchSelected { run_id: Uuid, size: usize },
    /// A record was tagged and its tags saved.
    RecordTagged { run_id: Uuid, nct_id: String },
    /// A record was marked failed.
    RecordFailed {
        run_id: Uuid,
        nct_id: String,
        error: String,
    },
    /// The run reached its limit or ran out of records.
    RunFinished { run_id: Uuid, summary: BatchSummary },
}

/// Drives records from a [`TrialStore`] through a [`TrialTagger`].
pub struct BatchDriver {
    store: Arc<dyn TrialStore>,
    tagger: Arc<dyn TrialTagger>,
    config: BatchConfig,
    event_tx: broadcast::Sender<BatchEvent>,
}

impl BatchDriver {
    /// Create a driver. Fails on invalid configuration.
    pub fn new(
        store: Arc<dyn TrialStore>,
        tagger: Arc<dyn TrialTagger>,
        config: BatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Ok(Self {
            store,
            tagger,
            config,
            event_tx,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Get a receiver for batch events.
    pub fn events(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: BatchEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Run until the maximum is reached or the store has nothing left.
    ///
    /// Per-record failures are recorded and the run continues; transport,
    /// configuration and store-availability failures end the run with `Err`.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "batch"))]
    pub async fn run(&self) -> Result<BatchSummary> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut summary = BatchSummary::default();
        let mut attempted: HashSet<String> = HashSet::new();

        info!(
            run_id = %run_id,
            batch_size = self.config.batch_size,
            max_trials = ?self.config.max_trials,
            concurrency = self.config.concurrency,
            selection = ?self.config.selection,
            processing_version = self.config.processing_version,
            "Batch run started"
        );
        self.emit(BatchEvent::RunStarted { run_id });

        loop {
            let remaining = self
                .config
                .max_trials
                .map(|max| max.saturating_sub(summary.processed));
            if remaining == Some(0) {
                debug!(run_id = %run_id, "Reached maximum trial count");
                break;
            }
            let size = remaining.map_or(self.config.batch_size, |r| r.min(self.config.batch_size));

            let records = self.select(size, started_at).await?;
            if records.is_empty() {
                debug!(run_id = %run_id, "No records left to process");
                break;
            }

            let fresh: Vec<TrialRecord> = records
                .into_iter()
                .filter(|record| attempted.insert(record.nct_id.clone()))
                .collect();
            if fresh.is_empty() {
                warn!(
                    run_id = %run_id,
                    "Store returned only records already attempted in this run, stopping"
                );
                break;
            }

            info!(run_id = %run_id, batch_size = fresh.len(), "Processing batch");
            self.emit(BatchEvent::BatchSelected {
                run_id,
                size: fresh.len(),
            });

            let mut outcomes = stream::iter(fresh)
                .map(|record| self.process_record(run_id, record))
                .buffered(self.config.concurrency);

            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    Ok(success) => summary.record(success),
                    Err(e) => {
                        error!(
                            run_id = %run_id,
                            error = %e,
                            processed = summary.processed,
                            "Batch run aborted"
                        );
                        return Err(e);
                    }
                }
            }
        }

        info!(
            run_id = %run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch run finished"
        );
        self.emit(BatchEvent::RunFinished { run_id, summary });
        Ok(summary)
    }

    async fn select(&self, size: usize, started_at: DateTime<Utc>) -> Result<Vec<TrialRecord>> {
        match self.config.selection {
            Selection::Unprocessed => self.store.find_unprocessed(size).await,
            Selection::RetryFailed => self.store.find_failed(size, started_at).await,
        }
    }

    /// Tag and persist one record. `Ok(false)` means it was marked failed.
    async fn process_record(&self, run_id: Uuid, record: TrialRecord) -> Result<bool> {
        let input = TrialInput::from(&record);
        let nct_id = record.nct_id.as_str();

        let tagged = match self.tagger.generate_tags(&input).await {
            Ok(tagged) => tagged,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(run_id = %run_id, nct_id, error = %e, "Tagging call failed");
                return self.mark_failed(run_id, nct_id, e.to_string()).await;
            }
        };

        let tags = match &tagged.outcome {
            Ok(tags) => tags,
            Err(e) => {
                warn!(run_id = %run_id, nct_id, error = %e, "No usable tags");
                return self.mark_failed(run_id, nct_id, e.to_string()).await;
            }
        };

        match self.store.save_tags(nct_id, tags).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(run_id = %run_id, nct_id, error = %e, "Failed to save tags");
                return self.mark_failed(run_id, nct_id, e.to_string()).await;
            }
        }

        self.store
            .mark_processed(nct_id, true, self.config.processing_version)
            .await?;
        debug!(run_id = %run_id, nct_id, "Trial tagged");
        self.emit(BatchEvent::RecordTagged {
            run_id,
            nct_id: nct_id.to_string(),
        });
        Ok(true)
    }

    async fn mark_failed(&self, run_id: Uuid, nct_id: &str, error: String) -> Result<bool> {
        self.store
            .mark_processed(nct_id, false, self.config.processing_version)
            .await?;
        self.emit(BatchEvent::RecordFailed {
            run_id,
            nct_id: nct_id.to_string(),
            error,
        });
        Ok(false)
    }
}
