use std::collections::HashMap;

use serde_json::{Number, Value};

use crate::queries::Document;

#[derive(Debug, Clone, Default)]
pub struct PercentileOptions {
    pub percentile_type: String,
    pub key: Option<String>,
    pub percentile_rank: f64,
    pub decimal_places: u32,
}

impl PercentileOptions {
    pub fn new(percentile_type: impl Into<String>) -> Self {
        Self {
            percentile_type: percentile_type.into(),
            ..Self::default()
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn percentile_rank(mut self, rank: f64) -> Self {
        self.percentile_rank = rank;
        self
    }

    pub fn decimal_places(mut self, places: u32) -> Self {
        self.decimal_places = places;
        self
    }

    fn name(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.percentile_type)
    }
}

/// Ranks records by `metric_<name>` and writes `percentile_<name>` onto every record whose
/// rank reaches `percentile_rank`. Ties share the rank of the first record in their run.
///
/// Returns the annotated records in ascending metric order. Records without the metric are
/// left untouched.
pub fn percentile(records: &mut [Document], options: &PercentileOptions) -> Vec<Document> {
    let metric_field = format!("metric_{}", options.name());
    let percentile_field = format!("percentile_{}", options.name());

    let mut ranked = records
        .iter()
        .enumerate()
        .filter_map(|(idx, record)| record.get(&metric_field).and_then(Value::as_f64).map(|v| (idx, v)))
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let count = ranked.len() as f64;
    let mut previous: Option<f64> = None;
    let mut rank = 0.0;
    let mut annotated = Vec::new();

    for (position, (idx, value)) in ranked.into_iter().enumerate() {
        if previous.map_or(true, |prev| value > prev) {
            rank = 100.0 * position as f64 / count;
            previous = Some(value);
        }
        if rank >= options.percentile_rank {
            let record = &mut records[idx];
            record.insert(
                percentile_field.clone(),
                number(round_to(rank, options.decimal_places)),
            );
            annotated.push(record.clone());
        }
    }

    annotated
}

/// Copies `metric_<type>` values from `incoming` onto `objects` with the same id and
/// appends incoming records that have no counterpart.
pub fn merge_metric(
    mut objects: Vec<Document>,
    incoming: Vec<Document>,
    percentile_types: &[&str],
) -> Vec<Document> {
    let positions = objects
        .iter()
        .enumerate()
        .filter_map(|(idx, object)| record_id(object).map(|id| (id, idx)))
        .collect::<HashMap<_, _>>();

    for record in incoming {
        let Some(&idx) = record_id(&record).and_then(|id| positions.get(&id)) else {
            objects.push(record);
            continue;
        };
        for percentile_type in percentile_types {
            let field = format!("metric_{percentile_type}");
            if let Some(value) = record.get(&field) {
                objects[idx].insert(field, value.clone());
            }
        }
    }

    objects
}

fn record_id(record: &Document) -> Option<String> {
    match record.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn round_to(value: f64, places: u32) -> f64 {
    if places == 0 {
        return value;
    }
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
