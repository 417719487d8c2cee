use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::{
    queries::{
        decode::decode_text,
        error::{QueryError, QueryResult},
        ColumnKind, SqlExecutor,
    },
    schema,
};

pub const DEFAULT_THRESHOLD: u32 = 2;
pub const DEFAULT_SHOW_CIVIL_ONLY: bool = true;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoaccusedEdge {
    pub officer_id_1: i64,
    pub officer_id_2: i64,
    pub allegation_id: i64,
    pub incident_date: String,
    pub accussed_count: i64,
}

/// Pairs of officers accused together at least `threshold` times, one row per shared
/// allegation once the threshold is reached.
#[derive(Debug, Clone)]
pub struct SocialGraphQuery {
    officer_ids: Vec<i64>,
    threshold: u32,
    show_civil_only: bool,
    show_connected_officers: bool,
}

impl SocialGraphQuery {
    pub fn new(officer_ids: Vec<i64>) -> Self {
        Self {
            officer_ids,
            threshold: DEFAULT_THRESHOLD,
            show_civil_only: DEFAULT_SHOW_CIVIL_ONLY,
            show_connected_officers: false,
        }
    }

    /// Zero falls back to the default threshold.
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = if threshold == 0 { DEFAULT_THRESHOLD } else { threshold };
        self
    }

    pub fn show_civil_only(mut self, show_civil_only: bool) -> Self {
        self.show_civil_only = show_civil_only;
        self
    }

    pub fn show_connected_officers(mut self, show_connected_officers: bool) -> Self {
        self.show_connected_officers = show_connected_officers;
        self
    }

    pub fn build_query(&self) -> String {
        let officer_allegation = schema::officer_allegation();
        let allegation = schema::allegation();
        let ids = self
            .officer_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let connector = if self.show_connected_officers { "OR" } else { "AND" };
        let civil_only = if self.show_civil_only {
            format!(" AND {}.is_officer_complaint IS FALSE", allegation.name())
        } else {
            String::new()
        };

        let coaccused = format!(
            "SELECT A.officer_id AS officer_id_1, B.officer_id AS officer_id_2, \
             A.allegation_id AS allegation_id, {a}.incident_date AS incident_date, \
             ROW_NUMBER() OVER (PARTITION BY A.officer_id, B.officer_id ORDER BY incident_date) AS accussed_count \
             FROM {oa} AS A \
             INNER JOIN {oa} AS B ON A.allegation_id = B.allegation_id \
             LEFT JOIN {a} ON {a}.{pk} = A.allegation_id \
             WHERE A.officer_id < B.officer_id \
             AND (B.officer_id IN ({ids}) {connector} A.officer_id IN ({ids})) \
             AND {a}.incident_date IS NOT NULL{civil_only}",
            a = allegation.name(),
            oa = officer_allegation.name(),
            pk = allegation.primary_key(),
        );

        format!(
            "SELECT * FROM ({coaccused}) coaccused_data WHERE accussed_count >= {} ORDER BY incident_date",
            self.threshold
        )
    }

    pub async fn execute(&self, executor: &dyn SqlExecutor) -> QueryResult<SocialGraph> {
        if self.officer_ids.is_empty() {
            return Ok(SocialGraph {
                edges: Vec::new(),
                requested: Vec::new(),
                show_connected_officers: self.show_connected_officers,
            });
        }

        let rows = executor.fetch_text_rows(&self.build_query()).await?;
        let edges = rows
            .iter()
            .map(|row| decode_edge(row))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(SocialGraph {
            edges,
            requested: self.officer_ids.clone(),
            show_connected_officers: self.show_connected_officers,
        })
    }
}

fn decode_edge(row: &[Option<String>]) -> QueryResult<CoaccusedEdge> {
    if row.len() < 5 {
        return Err(QueryError::ColumnCountMismatch {
            expected: 5,
            actual: row.len(),
        });
    }
    let integer = |idx: usize| -> QueryResult<i64> {
        let value = decode_text(Some(&ColumnKind::BigInt), row[idx].as_deref())?;
        value.as_i64().ok_or_else(|| QueryError::InvalidValue {
            kind: ColumnKind::BigInt.to_string(),
            value: value.to_string(),
        })
    };
    let incident_date = match decode_text(Some(&ColumnKind::TimestampTz), row[3].as_deref())? {
        Value::String(date) => date,
        other => {
            return Err(QueryError::InvalidValue {
                kind: ColumnKind::TimestampTz.to_string(),
                value: other.to_string(),
            })
        }
    };

    Ok(CoaccusedEdge {
        officer_id_1: integer(0)?,
        officer_id_2: integer(1)?,
        allegation_id: integer(2)?,
        incident_date,
        accussed_count: integer(4)?,
    })
}

#[derive(Debug, Clone)]
pub struct SocialGraph {
    edges: Vec<CoaccusedEdge>,
    requested: Vec<i64>,
    show_connected_officers: bool,
}

impl SocialGraph {
    pub fn edges(&self) -> &[CoaccusedEdge] {
        &self.edges
    }

    /// Distinct incident dates, ascending.
    pub fn list_events(&self) -> Vec<String> {
        self.edges
            .iter()
            .map(|edge| edge.incident_date.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The requested officers, plus everyone they connect to when connected officers are shown.
    pub fn officer_ids(&self) -> Vec<i64> {
        let mut ids = self.requested.iter().copied().collect::<BTreeSet<_>>();
        if self.show_connected_officers {
            for edge in &self.edges {
                ids.insert(edge.officer_id_1);
                ids.insert(edge.officer_id_2);
            }
        }
        ids.into_iter().collect()
    }
}
