//! Integration tests for the PostgreSQL trial store.
//!
//! These tests need a running PostgreSQL; they print a note and return early
//! when `DATABASE_URL` (or the default test URL) is unreachable.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ctsearch_db::test_fixtures::{TestDatabase, TrialFixture};
use ctsearch_db::{Error, PgTrialStore, ScoredTag, TagSet, TrialStore};

fn sample_tags() -> TagSet {
    let mut stage_relevance = BTreeMap::new();
    stage_relevance.insert("early".to_string(), 2);
    stage_relevance.insert("recurrent_metastatic".to_string(), 5);
    TagSet {
        conditions: vec![
            ScoredTag::new("Non-Small Cell Lung Cancer", 5),
            ScoredTag::new("Solid Tumor", 3),
        ],
        mechanisms: vec![ScoredTag::new("PD-1 inhibitor", 5)],
        targets: vec!["PD-1".to_string()],
        inclusion_criteria: vec!["ECOG 0-1".to_string()],
        exclusion_criteria: vec!["Active autoimmune disease".to_string()],
        simplified_eligibility: Some("Adults with advanced NSCLC.".to_string()),
        stage_relevance,
    }
}

#[tokio::test]
async fn test_find_unprocessed_assembles_record() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db
        .seed(
            TrialFixture::new("Pembrolizumab in NSCLC")
                .with_condition("NSCLC")
                .with_condition("Lung Cancer")
                .with_intervention("DRUG", "Pembrolizumab")
                .with_intervention("RADIATION", "SBRT")
                .with_criteria("Inclusion: age >= 18")
                .with_summary("A phase 2 study."),
        )
        .await;

    let trials = db.store.find_unprocessed(10_000).await.unwrap();
    let trial = trials
        .iter()
        .find(|t| t.nct_id == nct_id)
        .expect("seeded trial selected");

    assert_eq!(trial.brief_title.as_deref(), Some("Pembrolizumab in NSCLC"));
    assert_eq!(trial.conditions, vec!["NSCLC", "Lung Cancer"]);
    assert_eq!(trial.interventions.len(), 2);
    assert_eq!(trial.interventions[0].name.as_deref(), Some("Pembrolizumab"));
    assert_eq!(
        trial.interventions[1].intervention_type.as_deref(),
        Some("RADIATION")
    );
    assert_eq!(
        trial.eligibility.criteria.as_deref(),
        Some("Inclusion: age >= 18")
    );
    assert_eq!(trial.brief_summary.as_deref(), Some("A phase 2 study."));

    db.cleanup().await;
}

#[tokio::test]
async fn test_find_unprocessed_respects_limit() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    db.seed(TrialFixture::new("One")).await;
    db.seed(TrialFixture::new("Two")).await;

    let trials = db.store.find_unprocessed(1).await.unwrap();
    assert_eq!(trials.len(), 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_processed_records_are_not_selected_again() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let done = db.seed(TrialFixture::new("Done")).await;
    let failed = db.seed(TrialFixture::new("Failed")).await;
    let pending = db.seed(TrialFixture::new("Pending")).await;

    db.store.mark_processed(&done, true, 1).await.unwrap();
    db.store.mark_processed(&failed, false, 1).await.unwrap();

    let ids: Vec<String> = db
        .store
        .find_unprocessed(10_000)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.nct_id)
        .collect();

    assert!(ids.contains(&pending));
    assert!(!ids.contains(&done));
    assert!(!ids.contains(&failed));

    db.cleanup().await;
}

#[tokio::test]
async fn test_mark_processed_is_idempotent_and_overwrites() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db.seed(TrialFixture::new("Retry me")).await;

    db.store.mark_processed(&nct_id, false, 1).await.unwrap();
    let first = db.store.processing_state(&nct_id).await.unwrap().unwrap();
    assert!(!first.successfully_processed);

    db.store.mark_processed(&nct_id, true, 2).await.unwrap();
    db.store.mark_processed(&nct_id, true, 2).await.unwrap();

    let state = db.store.processing_state(&nct_id).await.unwrap().unwrap();
    assert!(state.successfully_processed);
    assert_eq!(state.processing_version, 2);
    assert!(state.processed_at >= first.processed_at);

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ctsearch.processed_trials WHERE nct_id = $1")
            .bind(&nct_id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert_eq!(rows, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_find_failed_only_returns_earlier_failures() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let failed = db.seed(TrialFixture::new("Failed")).await;
    let succeeded = db.seed(TrialFixture::new("Succeeded")).await;
    db.store.mark_processed(&failed, false, 1).await.unwrap();
    db.store.mark_processed(&succeeded, true, 1).await.unwrap();

    let later = Utc::now() + Duration::seconds(5);
    let ids: Vec<String> = db
        .store
        .find_failed(10_000, later)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.nct_id)
        .collect();
    assert!(ids.contains(&failed));
    assert!(!ids.contains(&succeeded));

    // Failures recorded after the cutoff belong to the current run
    let earlier = Utc::now() - Duration::hours(1);
    let ids: Vec<String> = db
        .store
        .find_failed(10_000, earlier)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.nct_id)
        .collect();
    assert!(!ids.contains(&failed));

    db.cleanup().await;
}

#[tokio::test]
async fn test_save_tags_round_trip() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db.seed(TrialFixture::new("Tagged")).await;

    db.store.save_tags(&nct_id, &sample_tags()).await.unwrap();
    let loaded = db.store.load_tags(&nct_id).await.unwrap();

    assert_eq!(
        loaded.conditions,
        vec![
            ScoredTag::new("Non-Small Cell Lung Cancer", 5),
            ScoredTag::new("Solid Tumor", 3),
        ]
    );
    assert_eq!(loaded.mechanisms, vec![ScoredTag::new("PD-1 inhibitor", 5)]);
    assert_eq!(loaded.targets, vec!["PD-1"]);
    assert_eq!(loaded.inclusion_criteria, vec!["ECOG 0-1"]);
    assert_eq!(loaded.exclusion_criteria, vec!["Active autoimmune disease"]);
    assert_eq!(
        loaded.simplified_eligibility.as_deref(),
        Some("Adults with advanced NSCLC.")
    );
    assert_eq!(loaded.stage_relevance.get("early"), Some(&2));
    assert_eq!(loaded.stage_relevance.get("recurrent_metastatic"), Some(&5));

    db.cleanup().await;
}

#[tokio::test]
async fn test_save_tags_twice_updates_in_place() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db.seed(TrialFixture::new("Retagged")).await;

    db.store.save_tags(&nct_id, &sample_tags()).await.unwrap();

    let mut updated = sample_tags();
    updated.conditions = vec![ScoredTag::new("Non-Small Cell Lung Cancer", 4)];
    updated.simplified_eligibility = Some("Revised summary.".to_string());
    db.store.save_tags(&nct_id, &updated).await.unwrap();

    let loaded = db.store.load_tags(&nct_id).await.unwrap();
    let nsclc: Vec<_> = loaded
        .conditions
        .iter()
        .filter(|t| t.name == "Non-Small Cell Lung Cancer")
        .collect();
    assert_eq!(nsclc.len(), 1);
    assert_eq!(nsclc[0].relevance, 4);
    assert_eq!(loaded.targets.len(), 1);
    assert_eq!(
        loaded.simplified_eligibility.as_deref(),
        Some("Revised summary.")
    );

    db.cleanup().await;
}

#[tokio::test]
async fn test_save_tags_skips_unknown_stage() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db.seed(TrialFixture::new("Staged")).await;

    let mut tags = TagSet::default();
    tags.stage_relevance.insert("terminal".to_string(), 4);
    tags.stage_relevance.insert("locally_advanced".to_string(), 3);
    db.store.save_tags(&nct_id, &tags).await.unwrap();

    let loaded = db.store.load_tags(&nct_id).await.unwrap();
    assert_eq!(loaded.stage_relevance.len(), 1);
    assert_eq!(loaded.stage_relevance.get("locally_advanced"), Some(&3));

    db.cleanup().await;
}

#[tokio::test]
async fn test_save_tags_is_all_or_nothing() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db.seed(TrialFixture::new("Half tagged")).await;

    // Conditions are written first; the out-of-range stage score then
    // violates the relevance CHECK constraint.
    let mut tags = sample_tags();
    tags.stage_relevance.insert("early".to_string(), 9);

    let err = db.store.save_tags(&nct_id, &tags).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    let loaded = db.store.load_tags(&nct_id).await.unwrap();
    assert!(loaded.is_empty());

    db.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_sharing_new_tags_do_not_deadlock() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };

    for _ in 0..20 {
        let first = db.seed(TrialFixture::new("Forward")).await;
        let second = db.seed(TrialFixture::new("Reversed")).await;

        // Fresh names every round so both transactions insert the same new rows
        let prefix = ctsearch_db::test_fixtures::unique_nct_id();
        let names: Vec<String> = (0..6).map(|i| format!("{prefix} condition {i}")).collect();
        let forward = TagSet {
            conditions: names.iter().map(|n| ScoredTag::new(n.clone(), 3)).collect(),
            targets: names.clone(),
            ..TagSet::default()
        };
        let reversed = TagSet {
            conditions: names.iter().rev().map(|n| ScoredTag::new(n.clone(), 4)).collect(),
            targets: names.iter().rev().cloned().collect(),
            ..TagSet::default()
        };

        let store_a = PgTrialStore::from_pool(db.pool.clone());
        let store_b = PgTrialStore::from_pool(db.pool.clone());
        let a = tokio::spawn(async move { store_a.save_tags(&first, &forward).await });
        let b = tokio::spawn(async move { store_b.save_tags(&second, &reversed).await });

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
    }

    db.cleanup().await;
}

#[tokio::test]
async fn test_save_tags_collapses_repeated_names() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let nct_id = db.seed(TrialFixture::new("Repeats")).await;

    let tags = TagSet {
        conditions: vec![
            ScoredTag::new("Melanoma", 2),
            ScoredTag::new("Melanoma", 5),
        ],
        targets: vec!["BRAF".to_string(), "BRAF".to_string()],
        ..TagSet::default()
    };
    db.store.save_tags(&nct_id, &tags).await.unwrap();

    let loaded = db.store.load_tags(&nct_id).await.unwrap();
    assert_eq!(loaded.conditions, vec![ScoredTag::new("Melanoma", 5)]);
    assert_eq!(loaded.targets, vec!["BRAF"]);

    db.cleanup().await;
}

#[tokio::test]
async fn test_stats_counts_seeded_records() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let before = db.store.stats().await.unwrap();

    let a = db.seed(TrialFixture::new("A")).await;
    let b = db.seed(TrialFixture::new("B")).await;
    db.seed(TrialFixture::new("C")).await;
    db.store.mark_processed(&a, true, 1).await.unwrap();
    db.store.mark_processed(&b, false, 1).await.unwrap();

    let after = db.store.stats().await.unwrap();
    // Other tests share the database, so compare lower bounds
    assert!(after.total_trials >= before.total_trials + 3);
    assert!(after.succeeded >= 1);
    assert!(after.failed >= 1);
    assert_eq!(after.processed, after.succeeded + after.failed);

    db.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_shares_one_pool() {
    let Some(db) = TestDatabase::connect().await else {
        return;
    };
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| ctsearch_db::test_fixtures::DEFAULT_TEST_DATABASE_URL.to_string());
    let store = Arc::new(PgTrialStore::from_url(&url).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.connect().await }));
    }

    let mut pools = Vec::new();
    for handle in handles {
        pools.push(handle.await.unwrap().unwrap());
    }
    store.close().await;
    // Every caller got a handle to the same pool, so closing it closes all
    assert!(pools.iter().all(|pool| pool.is_closed()));

    // A closed store reconnects on next use
    assert!(store.find_unprocessed(0).await.unwrap().is_empty());
    store.close().await;

    db.cleanup().await;
}
