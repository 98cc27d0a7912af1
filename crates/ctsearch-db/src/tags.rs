//! Tag persistence for the `ctsearch` schema.
//!
//! Every write runs inside the caller's transaction. Tag entities are shared
//! across trials and upserted by name; the per-trial link rows are unique on
//! `(nct_id, tag id)` so re-tagging a trial refreshes scores in place.
//!
//! Entity names are upserted in sorted order so concurrent transactions
//! lock shared tag rows in the same sequence.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use ctsearch_core::{Error, Result, ScoredTag, TagSet};

/// A tag entity table and the join table linking it to trials.
struct TagTable {
    entity: &'static str,
    name_column: &'static str,
    link: &'static str,
    link_column: &'static str,
}

const CONDITIONS: TagTable = TagTable {
    entity: "ctsearch.condition_tags",
    name_column: "condition_name",
    link: "ctsearch.trial_conditions",
    link_column: "condition_id",
};

const MECHANISMS: TagTable = TagTable {
    entity: "ctsearch.mechanism_categories",
    name_column: "category_name",
    link: "ctsearch.trial_mechanisms",
    link_column: "mechanism_id",
};

const TARGETS: TagTable = TagTable {
    entity: "ctsearch.treatment_targets",
    name_column: "target_name",
    link: "ctsearch.trial_targets",
    link_column: "target_id",
};

const INCLUSION: &str = "inclusion";
const EXCLUSION: &str = "exclusion";

/// Write every collection of `tags` for `nct_id`.
///
/// Empty collections are skipped. Stage names missing from
/// `ctsearch.disease_stages` are ignored.
pub(crate) async fn write_all(
    tx: &mut Transaction<'_, Postgres>,
    nct_id: &str,
    tags: &TagSet,
) -> Result<()> {
    write_scored(tx, &CONDITIONS, nct_id, &tags.conditions).await?;
    write_scored(tx, &MECHANISMS, nct_id, &tags.mechanisms).await?;

    for target in sorted_unique(&tags.targets) {
        let id = upsert_entity(tx, &TARGETS, target).await?;
        sqlx::query(&format!(
            "INSERT INTO {} (nct_id, {}) VALUES ($1, $2) ON CONFLICT (nct_id, {}) DO NOTHING",
            TARGETS.link, TARGETS.link_column, TARGETS.link_column
        ))
        .bind(nct_id)
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(Error::from_store)?;
    }

    write_criteria(tx, nct_id, INCLUSION, &tags.inclusion_criteria).await?;
    write_criteria(tx, nct_id, EXCLUSION, &tags.exclusion_criteria).await?;

    if let Some(text) = &tags.simplified_eligibility {
        sqlx::query(
            r#"
            INSERT INTO ctsearch.simplified_eligibility (nct_id, simplified_text, updated_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (nct_id) DO UPDATE SET
                simplified_text = EXCLUDED.simplified_text,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(nct_id)
        .bind(text)
        .execute(&mut **tx)
        .await
        .map_err(Error::from_store)?;
    }

    write_stages(tx, nct_id, &tags.stage_relevance).await
}

/// Names in ascending order; a repeated name keeps its last relevance.
fn by_name(tags: &[ScoredTag]) -> BTreeMap<&str, i16> {
    tags.iter()
        .map(|tag| (tag.name.as_str(), tag.relevance))
        .collect()
}

fn sorted_unique(names: &[String]) -> BTreeSet<&str> {
    names.iter().map(String::as_str).collect()
}

async fn upsert_entity(
    tx: &mut Transaction<'_, Postgres>,
    table: &TagTable,
    name: &str,
) -> Result<i32> {
    // DO UPDATE rather than DO NOTHING so RETURNING yields the existing id
    let row = sqlx::query(&format!(
        "INSERT INTO {entity} ({col}) VALUES ($1) \
         ON CONFLICT ({col}) DO UPDATE SET {col} = EXCLUDED.{col} \
         RETURNING id",
        entity = table.entity,
        col = table.name_column,
    ))
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(Error::from_store)?;

    Ok(row.try_get("id")?)
}

async fn write_scored(
    tx: &mut Transaction<'_, Postgres>,
    table: &TagTable,
    nct_id: &str,
    tags: &[ScoredTag],
) -> Result<()> {
    for (name, relevance) in by_name(tags) {
        let id = upsert_entity(tx, table, name).await?;
        sqlx::query(&format!(
            "INSERT INTO {link} (nct_id, {col}, relevance_score) VALUES ($1, $2, $3) \
             ON CONFLICT (nct_id, {col}) DO UPDATE SET relevance_score = EXCLUDED.relevance_score",
            link = table.link,
            col = table.link_column,
        ))
        .bind(nct_id)
        .bind(id)
        .bind(relevance)
        .execute(&mut **tx)
        .await
        .map_err(Error::from_store)?;
    }
    Ok(())
}

async fn write_criteria(
    tx: &mut Transaction<'_, Postgres>,
    nct_id: &str,
    criterion_type: &str,
    criteria: &[String],
) -> Result<()> {
    for text in sorted_unique(criteria) {
        let row = sqlx::query(
            r#"
            INSERT INTO ctsearch.criteria_tags (criterion_text, criterion_type)
            VALUES ($1, $2)
            ON CONFLICT (criterion_text, criterion_type)
                DO UPDATE SET criterion_text = EXCLUDED.criterion_text
            RETURNING id
            "#,
        )
        .bind(text)
        .bind(criterion_type)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::from_store)?;
        let id: i32 = row.try_get("id")?;

        sqlx::query(
            r#"
            INSERT INTO ctsearch.trial_criteria (nct_id, criterion_id)
            VALUES ($1, $2)
            ON CONFLICT (nct_id, criterion_id) DO NOTHING
            "#,
        )
        .bind(nct_id)
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(Error::from_store)?;
    }
    Ok(())
}

async fn write_stages(
    tx: &mut Transaction<'_, Postgres>,
    nct_id: &str,
    stages: &BTreeMap<String, i16>,
) -> Result<()> {
    for (stage, relevance) in stages {
        let stage_id: Option<i32> =
            sqlx::query_scalar("SELECT id FROM ctsearch.disease_stages WHERE stage_name = $1")
                .bind(stage)
                .fetch_optional(&mut **tx)
                .await
                .map_err(Error::from_store)?;

        let Some(stage_id) = stage_id else {
            debug!(
                subsystem = "db",
                component = "tags",
                nct_id,
                stage = %stage,
                "Skipping unknown disease stage"
            );
            continue;
        };

        sqlx::query(
            r#"
            INSERT INTO ctsearch.trial_stage_relevance (nct_id, stage_id, relevance_score)
            VALUES ($1, $2, $3)
            ON CONFLICT (nct_id, stage_id) DO UPDATE SET
                relevance_score = EXCLUDED.relevance_score
            "#,
        )
        .bind(nct_id)
        .bind(stage_id)
        .bind(relevance)
        .execute(&mut **tx)
        .await
        .map_err(Error::from_store)?;
    }
    Ok(())
}

/// Read back the tags stored for `nct_id`, each collection ordered by name.
pub(crate) async fn load(pool: &PgPool, nct_id: &str) -> Result<TagSet> {
    let conditions = load_scored(pool, &CONDITIONS, nct_id).await?;
    let mechanisms = load_scored(pool, &MECHANISMS, nct_id).await?;

    let targets: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT t.target_name
        FROM ctsearch.trial_targets tt
        JOIN ctsearch.treatment_targets t ON t.id = tt.target_id
        WHERE tt.nct_id = $1
        ORDER BY t.target_name
        "#,
    )
    .bind(nct_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from_store)?;

    let criteria = sqlx::query(
        r#"
        SELECT c.criterion_text, c.criterion_type
        FROM ctsearch.trial_criteria tc
        JOIN ctsearch.criteria_tags c ON c.id = tc.criterion_id
        WHERE tc.nct_id = $1
        ORDER BY c.criterion_text
        "#,
    )
    .bind(nct_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from_store)?;

    let mut inclusion_criteria = Vec::new();
    let mut exclusion_criteria = Vec::new();
    for row in criteria {
        let text: String = row.try_get("criterion_text")?;
        let kind: String = row.try_get("criterion_type")?;
        if kind == INCLUSION {
            inclusion_criteria.push(text);
        } else {
            exclusion_criteria.push(text);
        }
    }

    let simplified_eligibility: Option<String> = sqlx::query_scalar(
        "SELECT simplified_text FROM ctsearch.simplified_eligibility WHERE nct_id = $1",
    )
    .bind(nct_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::from_store)?;

    let stage_rows = sqlx::query(
        r#"
        SELECT ds.stage_name, sr.relevance_score
        FROM ctsearch.trial_stage_relevance sr
        JOIN ctsearch.disease_stages ds ON ds.id = sr.stage_id
        WHERE sr.nct_id = $1
        "#,
    )
    .bind(nct_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from_store)?;

    let mut stage_relevance: BTreeMap<String, i16> = BTreeMap::new();
    for row in stage_rows {
        stage_relevance.insert(row.try_get("stage_name")?, row.try_get("relevance_score")?);
    }

    Ok(TagSet {
        conditions,
        mechanisms,
        targets,
        inclusion_criteria,
        exclusion_criteria,
        simplified_eligibility,
        stage_relevance,
    })
}

async fn load_scored(pool: &PgPool, table: &TagTable, nct_id: &str) -> Result<Vec<ScoredTag>> {
    let rows = sqlx::query(&format!(
        "SELECT e.{name} AS name, l.relevance_score \
         FROM {link} l JOIN {entity} e ON e.id = l.{col} \
         WHERE l.nct_id = $1 ORDER BY e.{name}",
        name = table.name_column,
        link = table.link,
        entity = table.entity,
        col = table.link_column,
    ))
    .bind(nct_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from_store)?;

    rows.iter()
        .map(|row| -> Result<ScoredTag> {
            Ok(ScoredTag::new(
                row.try_get::<String, _>("name")?,
                row.try_get::<i16, _>("relevance_score")?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name_sorts_and_keeps_last_score() {
        let tags = vec![
            ScoredTag::new("Solid Tumor", 3),
            ScoredTag::new("Melanoma", 2),
            ScoredTag::new("Melanoma", 5),
        ];
        let ordered: Vec<_> = by_name(&tags).into_iter().collect();
        assert_eq!(ordered, vec![("Melanoma", 5), ("Solid Tumor", 3)]);
    }

    #[test]
    fn test_sorted_unique() {
        let names = vec!["PD-L1".to_string(), "BRAF".to_string(), "PD-L1".to_string()];
        let ordered: Vec<_> = sorted_unique(&names).into_iter().collect();
        assert_eq!(ordered, vec!["BRAF", "PD-L1"]);
    }
}
