use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    ForeignKeyNotFound(String),
    #[error("{0} lookup is not supported yet.")]
    UnsupportedLookup(String),
    #[error("lookup value of type {0} is not supported yet.")]
    UnsupportedValue(String),
    #[error("Cant do \"in\" lookup for empty list.")]
    EmptyInLookup,
    #[error("Unknown relation alias {0}")]
    UnknownRelation(String),
    #[error("Unknown field {field} on {relation}")]
    UnknownField { relation: String, field: String },
    #[error("Cannot yet serialize subfield of kind \"{kind}\", value was \"{value}\"")]
    UnsupportedKind { kind: String, value: String },
    #[error("Malformed postgres array at byte {position}: {source_text}")]
    MalformedArray {
        position: usize,
        source_text: String,
    },
    #[error("Invalid {kind} value \"{value}\"")]
    InvalidValue { kind: String, value: String },
    #[error("Row has {actual} columns, expected {expected}")]
    ColumnCountMismatch { expected: usize, actual: usize },
    #[error("Database error: {0}")]
    Database(String),
}

impl From<tokio_postgres::Error> for QueryError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(err.to_string())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
