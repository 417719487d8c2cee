pub mod alias;
pub mod elasticsearch;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::queries::Document;

pub use alias::IndexAlias;
pub use elasticsearch::ElasticsearchBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("Index store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index {0} does not exist")]
    MissingIndex(String),
    #[error("Index store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Index store lock poisoned")]
    LockPoisoned,
}

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Index {
        index: String,
        doc_type: String,
        id: Option<String>,
        source: Document,
    },
    /// Appends `doc` to the `property` array of document `id`, creating it when missing.
    Upsert {
        index: String,
        doc_type: String,
        id: String,
        property: String,
        doc: Document,
    },
}

impl BulkAction {
    pub fn index(&self) -> &str {
        match self {
            Self::Index { index, .. } | Self::Upsert { index, .. } => index,
        }
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn create_index(&self, index: &str) -> SearchResult<()>;

    async fn delete_index(&self, index: &str) -> SearchResult<()>;

    async fn index_exists(&self, index: &str) -> SearchResult<bool>;

    async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> SearchResult<()>;

    /// Physical indices the alias currently points at.
    async fn alias_targets(&self, alias: &str) -> SearchResult<Vec<String>>;

    /// Atomically points `alias` at `new_index` only.
    async fn swap_alias(&self, alias: &str, new_index: &str) -> SearchResult<()>;

    async fn bulk(&self, actions: &[BulkAction]) -> SearchResult<()>;

    /// Copies the documents of `doc_types` from `source` into `dest`.
    async fn reindex(
        &self,
        source: &str,
        dest: &str,
        doc_types: &[String],
        timeout: Duration,
    ) -> SearchResult<()>;

    async fn refresh(&self, index: &str) -> SearchResult<()>;

    async fn count(&self, index: &str) -> SearchResult<u64>;
}
