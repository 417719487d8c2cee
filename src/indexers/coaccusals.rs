use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    indexers::Indexer,
    queries::{Document, Query, QueryField, QueryResult, QuerySpec, SqlExecutor},
    schema,
};

/// `officer -> coaccused officer -> allegations shared`
pub type CoaccusalCounts = BTreeMap<i64, BTreeMap<i64, u64>>;

/// Counts shared allegations for every ordered pair of officers named in the same allegation.
pub fn coaccusal_counts(memberships: impl IntoIterator<Item = (i64, i64)>) -> CoaccusalCounts {
    let mut by_allegation: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for (allegation_id, officer_id) in memberships {
        by_allegation.entry(allegation_id).or_default().insert(officer_id);
    }

    let mut counts = CoaccusalCounts::new();
    for officer_ids in by_allegation.values().filter(|ids| ids.len() > 1) {
        for &officer in officer_ids {
            for &coaccused in officer_ids.iter().filter(|&&other| other != officer) {
                *counts
                    .entry(officer)
                    .or_default()
                    .entry(coaccused)
                    .or_insert(0) += 1;
            }
        }
    }
    counts
}

fn membership_query() -> Query {
    Query::distinct(
        QuerySpec::new(schema::officer_allegation())
            .field("allegation_id", "allegation_id")
            .field("officer_id", "officer_id"),
    )
}

fn officer_query() -> Query {
    Query::distinct(
        QuerySpec::new(schema::officer())
            .field("id", "id")
            .field("first_name", "first_name")
            .field("last_name", "last_name")
            .field("race", "race")
            .field("gender", "gender")
            .field("birth_year", "birth_year")
            .field("rank", "rank")
            .field("complaint_percentile", "complaint_percentile")
            .field("civilian_allegation_percentile", "civilian_allegation_percentile")
            .field("internal_allegation_percentile", "internal_allegation_percentile")
            .field("trr_percentile", "trr_percentile")
            .field(
                "complaint_count",
                QueryField::count(schema::officer_allegation(), "base_table"),
            )
            .field(
                "sustained_complaint_count",
                QueryField::count_where(
                    schema::officer_allegation(),
                    "base_table",
                    &[("final_finding", "SU")],
                ),
            ),
    )
}

fn officer_summary(row: &Document) -> Document {
    let name_part = |key: &str| row.get(key).and_then(Value::as_str).unwrap_or_default();
    let full_name = format!("{} {}", name_part("first_name"), name_part("last_name"))
        .trim()
        .to_string();
    let field = |key: &str| row.get(key).cloned().unwrap_or(Value::Null);
    let gender = row
        .get("gender")
        .and_then(Value::as_str)
        .map(|code| Value::String(schema::gender_display(code).to_string()))
        .unwrap_or(Value::Null);

    let summary = json!({
        "id": field("id"),
        "full_name": full_name,
        "allegation_count": field("complaint_count"),
        "sustained_count": field("sustained_complaint_count"),
        "race": field("race"),
        "gender": gender,
        "birth_year": field("birth_year"),
        "rank": field("rank"),
        "percentile_allegation": field("complaint_percentile"),
        "percentile_allegation_civilian": field("civilian_allegation_percentile"),
        "percentile_allegation_internal": field("internal_allegation_percentile"),
        "percentile_trr": field("trr_percentile"),
    });
    match summary {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// One document per officer listing every coaccused officer with the shared count.
pub struct CoaccusalsIndexer;

#[async_trait]
impl Indexer for CoaccusalsIndexer {
    fn app(&self) -> &'static str {
        "officers"
    }

    fn doc_type(&self) -> &'static str {
        "officer_coaccusals"
    }

    fn alias(&self) -> &'static str {
        "officers"
    }

    fn mapping(&self) -> Value {
        json!({
            "properties": {
                "id": { "type": "long" },
                "coaccusals": {
                    "type": "nested",
                    "properties": {
                        "id": { "type": "long" },
                        "full_name": { "type": "keyword" },
                        "coaccusal_count": { "type": "long" },
                        "allegation_count": { "type": "long" },
                        "sustained_count": { "type": "long" },
                        "race": { "type": "keyword" },
                        "gender": { "type": "keyword" },
                        "birth_year": { "type": "long" },
                        "rank": { "type": "keyword" },
                        "percentile_allegation": { "type": "float" },
                        "percentile_allegation_civilian": { "type": "float" },
                        "percentile_allegation_internal": { "type": "float" },
                        "percentile_trr": { "type": "float" },
                    },
                },
            },
        })
    }

    async fn extract(&self, executor: &dyn SqlExecutor) -> Result<Vec<Document>> {
        let memberships = membership_query()
            .execute(executor)
            .await
            .context("Failed loading officer allegations")?
            .collect::<QueryResult<Vec<_>>>()?
            .into_iter()
            .filter_map(|row| {
                Some((
                    row.get("allegation_id")?.as_i64()?,
                    row.get("officer_id")?.as_i64()?,
                ))
            });
        let counts = coaccusal_counts(memberships);
        info!(officers = counts.len(), "Populated coaccusal counts");

        let mut summaries = BTreeMap::new();
        for row in officer_query()
            .execute(executor)
            .await
            .context("Failed loading officers")?
        {
            let row = row?;
            let Some(id) = row.get("id").and_then(Value::as_i64) else {
                continue;
            };
            summaries.insert(id, officer_summary(&row));
        }
        info!(officers = summaries.len(), "Populated officer summaries");

        let empty = BTreeMap::new();
        let docs = summaries
            .keys()
            .map(|&officer_id| {
                let coaccusals = counts
                    .get(&officer_id)
                    .unwrap_or(&empty)
                    .iter()
                    .filter_map(|(coaccused_id, count)| {
                        let mut entry = Document::new();
                        entry.insert("coaccusal_count".to_string(), json!(count));
                        entry.extend(summaries.get(coaccused_id)?.clone());
                        Some(Value::Object(entry))
                    })
                    .collect::<Vec<_>>();

                let mut doc = Document::new();
                doc.insert("id".to_string(), json!(officer_id));
                doc.insert("coaccusals".to_string(), Value::Array(coaccusals));
                doc
            })
            .collect();
        Ok(docs)
    }
}
