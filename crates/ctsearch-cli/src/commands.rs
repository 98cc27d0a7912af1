//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::Value as JsonValue;
use tracing::info;

use ctsearch_core::{Error, TrialInput};
use ctsearch_db::{parse_database_url, ConnectParams, PgConnectOptions, PgTrialStore, PoolConfig};
use ctsearch_inference::{AnthropicBackend, AnthropicConfig, LlmTagger};
use ctsearch_ingest::{AactDownloader, ClinicalTrialsGovClient};
use ctsearch_jobs::{BatchConfig, BatchDriver, Selection};

use crate::{BatchArgs, DbArgs, LlmArgs};

impl DbArgs {
    /// `--database-url` wins over the individual connection flags.
    pub fn connect_options(&self) -> ctsearch_core::Result<PgConnectOptions> {
        if let Some(url) = &self.database_url {
            return parse_database_url(url);
        }
        Ok(ConnectParams {
            host: Some(self.db_host.clone()),
            port: Some(self.db_port),
            username: Some(self.db_user.clone()),
            password: Some(self.db_password.clone()),
            database: Some(self.db_name.clone()),
        }
        .to_connect_options())
    }

    fn store(&self) -> anyhow::Result<PgTrialStore> {
        Ok(PgTrialStore::new(
            self.connect_options()?,
            PoolConfig::default(),
        ))
    }
}

impl BatchArgs {
    /// Flags override `BATCH_*` environment settings.
    pub fn batch_config(&self) -> BatchConfig {
        let mut config = BatchConfig::from_env();
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if self.max_trials.is_some() {
            config = config.with_max_trials(self.max_trials);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(version) = self.processing_version {
            config = config.with_processing_version(version);
        }
        if self.retry_failed {
            config = config.with_selection(Selection::RetryFailed);
        }
        config
    }
}

/// Build the Anthropic backend, failing before any work when no key is set.
pub fn build_backend(llm: &LlmArgs) -> ctsearch_core::Result<AnthropicBackend> {
    let api_key = llm
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(
                "API key is required. Set ANTHROPIC_API_KEY environment variable or use --api-key"
                    .to_string(),
            )
        })?;

    let mut config = AnthropicConfig::new(api_key).with_model(llm.model.clone());
    if let Some(base_url) = &llm.base_url {
        config = config.with_base_url(base_url.clone());
    }
    AnthropicBackend::new(config)
}

/// `<stem>_processed.<ext>` next to the input file.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trials".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{stem}_processed.{}", ext.to_string_lossy()),
        None => format!("{stem}_processed"),
    };
    input.with_file_name(name)
}

/// Read trials from a JSON list or a saved search (`{"results": [...]}`).
pub fn load_trial_inputs(path: &Path) -> anyhow::Result<Vec<TrialInput>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Input file not found: {}", path.display()))?;
    let data: JsonValue = serde_json::from_str(&text)
        .with_context(|| format!("Input file is not valid JSON: {}", path.display()))?;

    let trials = match data {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("results") {
            Some(JsonValue::Array(items)) => items,
            _ => bail!("Invalid input data format. Expected list of trials or dict with 'results' key"),
        },
        _ => bail!("Invalid input data format. Expected list of trials or dict with 'results' key"),
    };

    trials
        .into_iter()
        .enumerate()
        .map(|(i, trial)| {
            serde_json::from_value(trial).with_context(|| format!("Invalid trial at index {i}"))
        })
        .collect()
}

pub async fn download_aact(data_dir: &Path) -> anyhow::Result<()> {
    let downloader = AactDownloader::new(data_dir)?;
    info!("Starting download of latest AACT dataset");
    let output = downloader.download_latest_dataset().await?;
    println!("Successfully downloaded AACT dataset to {}", output.display());
    Ok(())
}

pub async fn download_bulk(data_dir: &Path) -> anyhow::Result<()> {
    let client = ClinicalTrialsGovClient::new(data_dir)?;
    let output = client.download_bulk_data().await?;
    println!(
        "Successfully downloaded ClinicalTrials.gov bulk data to {}",
        output.display()
    );
    Ok(())
}

pub async fn search(
    data_dir: &Path,
    query: &str,
    max_results: usize,
    fields: &[String],
) -> anyhow::Result<()> {
    let client = ClinicalTrialsGovClient::new(data_dir)?;
    let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
    let fields = (!fields.is_empty()).then_some(fields.as_slice());

    let results = client.search_trials(query, fields, max_results).await?;
    let output = client.save_search_results(&results, query)?;
    println!("Saved {} studies to {}", results.len(), output.display());
    Ok(())
}

pub async fn tag_file(
    llm: &LlmArgs,
    input: &Path,
    output: Option<PathBuf>,
    max_trials: Option<usize>,
) -> anyhow::Result<()> {
    let backend = build_backend(llm)?;
    let output = output.unwrap_or_else(|| default_output_path(input));

    let mut trials = load_trial_inputs(input)?;
    if let Some(max) = max_trials {
        trials.truncate(max);
        info!(count = trials.len(), "Processing trials (limited by --max-trials)");
    } else {
        info!(count = trials.len(), "Processing trials");
    }

    let tagger = LlmTagger::new(backend);
    let tagged = tagger.tag_batch(trials).await?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, serde_json::to_string_pretty(&tagged)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let succeeded = tagged.iter().filter(|t| t.is_success()).count();
    info!(
        processed = tagged.len(),
        succeeded,
        path = %output.display(),
        "Saved processed results"
    );
    println!(
        "Processed {} trials ({} tagged); results saved to {}",
        tagged.len(),
        succeeded,
        output.display()
    );
    Ok(())
}

pub async fn tag_db(
    llm: &LlmArgs,
    db: &DbArgs,
    batch: &BatchArgs,
    migrate: bool,
) -> anyhow::Result<()> {
    let backend = build_backend(llm)?;
    let config = batch.batch_config();
    config.validate()?;

    let store = Arc::new(db.store()?);
    let result = async {
        if migrate {
            store.migrate().await?;
        }
        let driver = BatchDriver::new(store.clone(), Arc::new(LlmTagger::new(backend)), config)?;
        driver.run().await
    }
    .await;
    store.close().await;

    let summary = result?;
    println!(
        "Processed {} trials ({} succeeded, {} failed)",
        summary.processed, summary.succeeded, summary.failed
    );
    Ok(())
}

pub async fn status(db: &DbArgs) -> anyhow::Result<()> {
    let store = db.store()?;
    let stats = store.stats().await;
    store.close().await;
    let stats = stats?;

    println!("Trials in source:   {}", stats.total_trials);
    println!("Processed:          {}", stats.processed);
    println!("  succeeded:        {}", stats.succeeded);
    println!("  failed:           {}", stats.failed);
    println!("Not yet processed:  {}", stats.unprocessed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn llm_args(api_key: Option<&str>) -> LlmArgs {
        LlmArgs {
            api_key: api_key.map(str::to_string),
            model: "claude-test".to_string(),
            base_url: None,
        }
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("data/raw/search_melanoma_20250511.json")),
            PathBuf::from("data/raw/search_melanoma_20250511_processed.json")
        );
        assert_eq!(
            default_output_path(Path::new("trials")),
            PathBuf::from("trials_processed")
        );
    }

    #[test]
    fn test_load_trial_inputs_accepts_list_and_results() {
        let dir = TempDir::new().unwrap();

        let list = dir.path().join("list.json");
        std::fs::write(
            &list,
            r#"[{"NCTId": "NCT1", "Condition": ["Melanoma"]}, {"NCTId": "NCT2"}]"#,
        )
        .unwrap();
        let trials = load_trial_inputs(&list).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].nct_id, "NCT1");

        let search = dir.path().join("search.json");
        std::fs::write(
            &search,
            r#"{"query": "melanoma", "timestamp": "x", "results": [{"NCTId": "NCT3", "StartDate": "2024-01"}]}"#,
        )
        .unwrap();
        let trials = load_trial_inputs(&search).unwrap();
        assert_eq!(trials[0].nct_id, "NCT3");
        assert_eq!(trials[0].extra["StartDate"], "2024-01");
    }

    #[test]
    fn test_load_trial_inputs_rejects_other_shapes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"studies": []}"#).unwrap();

        let err = load_trial_inputs(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid input data format"));

        assert!(load_trial_inputs(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        assert!(matches!(build_backend(&llm_args(None)), Err(Error::Config(_))));
        assert!(matches!(build_backend(&llm_args(Some("  "))), Err(Error::Config(_))));
        assert!(build_backend(&llm_args(Some("sk-test"))).is_ok());
    }

    #[test]
    fn test_database_url_wins_over_flags() {
        let db = DbArgs {
            database_url: Some("postgres://u:p@db.example.org:6000/aact".to_string()),
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: "postgres".to_string(),
            db_password: "postgres".to_string(),
            db_name: "other".to_string(),
        };
        let options = db.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.example.org");
        assert_eq!(options.get_port(), 6000);
        assert_eq!(options.get_database(), Some("aact"));
    }

    #[test]
    fn test_batch_flags_override() {
        let batch = BatchArgs {
            batch_size: Some(20),
            max_trials: Some(100),
            concurrency: Some(3),
            processing_version: Some(2),
            retry_failed: true,
        };
        let config = batch.batch_config();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_trials, Some(100));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.processing_version, 2);
        assert_eq!(config.selection, Selection::RetryFailed);
    }
}
