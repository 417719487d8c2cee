use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Number, Value};

use crate::queries::{
    error::{QueryError, QueryResult},
    table::ColumnKind,
};

/// Converts one PostgreSQL text value into JSON according to its column kind.
/// A missing kind always yields null.
pub fn decode_text(kind: Option<&ColumnKind>, text: Option<&str>) -> QueryResult<Value> {
    let (Some(kind), Some(text)) = (kind, text) else {
        return Ok(Value::Null);
    };

    match kind {
        ColumnKind::Serial | ColumnKind::SmallInt | ColumnKind::Integer | ColumnKind::BigInt => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(kind, text)),
        ColumnKind::Numeric | ColumnKind::Real | ColumnKind::DoublePrecision => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(kind, text)),
        ColumnKind::Varchar | ColumnKind::Text => Ok(Value::String(text.to_string())),
        ColumnKind::Boolean => Ok(match text {
            "t" | "true" | "Yes" => Value::Bool(true),
            "f" | "false" | "No" => Value::Bool(false),
            _ => Value::Null,
        }),
        ColumnKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| invalid(kind, text)),
        ColumnKind::Timestamp => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .map_err(|_| invalid(kind, text)),
        ColumnKind::TimestampTz => parse_timestamptz(text)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .ok_or_else(|| invalid(kind, text)),
        ColumnKind::Jsonb => serde_json::from_str(text).map_err(|_| invalid(kind, text)),
        ColumnKind::Geometry => parse_gml_point(text),
        ColumnKind::Other(name) => Err(QueryError::UnsupportedKind {
            kind: name.clone(),
            value: text.to_string(),
        }),
    }
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reads the output of `ST_AsGML` for a point into `{lon, lat}`.
pub fn parse_gml_point(text: &str) -> QueryResult<Value> {
    let coordinates = between(text, "<gml:coordinates>", "</gml:coordinates>")
        .map(|raw| raw.split(',').collect::<Vec<_>>())
        .or_else(|| {
            between(text, "<gml:pos>", "</gml:pos>")
                .map(|raw| raw.split_whitespace().collect::<Vec<_>>())
        })
        .ok_or_else(|| invalid(&ColumnKind::Geometry, text))?;

    let [lon, lat, ..] = coordinates.as_slice() else {
        return Err(invalid(&ColumnKind::Geometry, text));
    };
    let lon = lon.trim().parse::<f64>().map_err(|_| invalid(&ColumnKind::Geometry, text))?;
    let lat = lat.trim().parse::<f64>().map_err(|_| invalid(&ColumnKind::Geometry, text))?;

    Ok(json!({ "lon": lon, "lat": lat }))
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

fn invalid(kind: &ColumnKind, text: &str) -> QueryError {
    QueryError::InvalidValue {
        kind: kind.to_string(),
        value: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_by_kind() {
        let cases: Vec<(Option<ColumnKind>, Option<&str>, Value)> = vec![
            (Some(ColumnKind::SmallInt), Some("1"), json!(1)),
            (Some(ColumnKind::Varchar), Some("abc"), json!("abc")),
            (Some(ColumnKind::Text), Some("abc"), json!("abc")),
            (Some(ColumnKind::Numeric), Some("1.2"), json!(1.2)),
            (Some(ColumnKind::Boolean), Some("t"), json!(true)),
            (Some(ColumnKind::Boolean), Some("f"), json!(false)),
            (Some(ColumnKind::Boolean), Some("Yes"), json!(true)),
            (Some(ColumnKind::Boolean), None, Value::Null),
            (Some(ColumnKind::Date), Some("2016-08-14"), json!("2016-08-14")),
            (Some(ColumnKind::Integer), Some("12"), json!(12)),
            (Some(ColumnKind::Serial), Some("12"), json!(12)),
            (None, Some("abc"), Value::Null),
            (Some(ColumnKind::Numeric), None, Value::Null),
            (
                Some(ColumnKind::Jsonb),
                Some(r#"{"key":"value"}"#),
                json!({ "key": "value" }),
            ),
            (
                Some(ColumnKind::TimestampTz),
                Some("2016-03-05 10:30:00+00"),
                json!("2016-03-05T10:30:00+00:00"),
            ),
        ];

        for (kind, text, expected) in cases {
            assert_eq!(decode_text(kind.as_ref(), text).unwrap(), expected);
        }
    }

    #[test]
    fn decode_geometry() {
        let value = decode_text(
            Some(&ColumnKind::Geometry),
            Some(
                "<gml:Point srsName=\"EPSG:4326\"><gml:coordinates>\
                 -87.721100300000003,41.8372636</gml:coordinates></gml:Point>",
            ),
        )
        .unwrap();
        let lon = value["lon"].as_f64().unwrap();
        let lat = value["lat"].as_f64().unwrap();
        assert!((lon - -87.7211003).abs() < 1e-9);
        assert!((lat - 41.8372636).abs() < 1e-9);
    }

    #[test]
    fn unsupported_kind_is_reported() {
        let err = decode_text(
            Some(&ColumnKind::Other("my_type".to_string())),
            Some("my_string"),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot yet serialize subfield of kind \"my_type\", value was \"my_string\""
        );
    }

    #[test]
    fn invalid_integer_is_reported() {
        assert!(matches!(
            decode_text(Some(&ColumnKind::Integer), Some("abc")),
            Err(QueryError::InvalidValue { .. })
        ));
    }
}
