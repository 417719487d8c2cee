use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use tokio::task;
use tracing::info;
use uuid::Uuid;

use crate::search::{BulkAction, SearchBackend, SearchError, SearchResult};

/// Local index store with the same alias semantics as Elasticsearch, kept in one SQLite file.
/// Every statement runs on the blocking pool.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> SearchResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> SearchResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SearchResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS search_indices (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS search_mappings (
                index_name TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                mapping_json TEXT NOT NULL,
                PRIMARY KEY (index_name, doc_type)
            );
            CREATE TABLE IF NOT EXISTS search_aliases (
                alias TEXT NOT NULL,
                index_name TEXT NOT NULL,
                PRIMARY KEY (alias, index_name)
            );
            CREATE TABLE IF NOT EXISTS search_documents (
                index_name TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                source_json TEXT NOT NULL,
                PRIMARY KEY (index_name, doc_type, doc_id)
            );
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, work: F) -> SearchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> SearchResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| SearchError::LockPoisoned)?;
            work(&mut *conn)
        })
        .await?
    }

    /// Reads one document through an index or alias name.
    pub async fn get_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> SearchResult<Option<Value>> {
        let (index, doc_type, id) = (index.to_string(), doc_type.to_string(), id.to_string());
        self.with_conn(move |conn| {
            for name in resolve(conn, &index)? {
                let source: Option<String> = conn
                    .query_row(
                        "SELECT source_json FROM search_documents WHERE index_name=?1 AND doc_type=?2 AND doc_id=?3",
                        params![name, doc_type, id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(source) = source {
                    return Ok(Some(serde_json::from_str(&source)?));
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn indices(&self) -> SearchResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM search_indices ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row?);
            }
            Ok(names)
        })
        .await
    }
}

fn index_exists(conn: &Connection, index: &str) -> SearchResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM search_indices WHERE name=?1",
            params![index],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn alias_targets(conn: &Connection, alias: &str) -> SearchResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT index_name FROM search_aliases WHERE alias=?1 ORDER BY index_name")?;
    let rows = stmt.query_map(params![alias], |row| row.get(0))?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

/// Concrete indices behind a name: the index itself, or every target of the alias.
fn resolve(conn: &Connection, name: &str) -> SearchResult<Vec<String>> {
    if index_exists(conn, name)? {
        return Ok(vec![name.to_string()]);
    }
    let targets = alias_targets(conn, name)?;
    if targets.is_empty() {
        return Err(SearchError::MissingIndex(name.to_string()));
    }
    Ok(targets)
}

fn require_index(conn: &Connection, index: &str) -> SearchResult<()> {
    if index_exists(conn, index)? {
        Ok(())
    } else {
        Err(SearchError::MissingIndex(index.to_string()))
    }
}

fn write_bulk(conn: &mut Connection, actions: &[BulkAction]) -> SearchResult<()> {
    let tx = conn.transaction()?;

    for action in actions {
        require_index(&tx, action.index())?;
        match action {
            BulkAction::Index {
                index,
                doc_type,
                id,
                source,
            } => {
                let doc_id = id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
                tx.execute(
                    "INSERT OR REPLACE INTO search_documents(index_name,doc_type,doc_id,source_json) VALUES(?1,?2,?3,?4)",
                    params![index, doc_type, doc_id, Value::Object(source.clone()).to_string()],
                )?;
            }
            BulkAction::Upsert {
                index,
                doc_type,
                id,
                property,
                doc,
            } => {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT source_json FROM search_documents WHERE index_name=?1 AND doc_type=?2 AND doc_id=?3",
                        params![index, doc_type, id],
                        |row| row.get(0),
                    )
                    .optional()?;

                let merged = match existing {
                    Some(raw) => {
                        let mut parent: Value = serde_json::from_str(&raw)?;
                        if let Value::Object(fields) = &mut parent {
                            let children = fields
                                .entry(property.clone())
                                .or_insert_with(|| Value::Array(Vec::new()));
                            match children {
                                Value::Array(items) => items.push(Value::Object(doc.clone())),
                                other => *other = json!([doc]),
                            }
                        }
                        parent
                    }
                    None => {
                        let parent_id = doc.get("id").cloned().unwrap_or_else(|| json!(id));
                        json!({ "id": parent_id, property.as_str(): [doc] })
                    }
                };

                tx.execute(
                    "INSERT OR REPLACE INTO search_documents(index_name,doc_type,doc_id,source_json) VALUES(?1,?2,?3,?4)",
                    params![index, doc_type, id, merged.to_string()],
                )?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

#[async_trait]
impl SearchBackend for SqliteBackend {
    async fn create_index(&self, index: &str) -> SearchResult<()> {
        let name = index.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO search_indices(name,created_at) VALUES(?1,?2)",
                params![name, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?;
        info!(index = %index, "Created local index");
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> SearchResult<()> {
        let name = index.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM search_documents WHERE index_name=?1", params![name])?;
            tx.execute("DELETE FROM search_mappings WHERE index_name=?1", params![name])?;
            tx.execute("DELETE FROM search_aliases WHERE index_name=?1", params![name])?;
            tx.execute("DELETE FROM search_indices WHERE name=?1", params![name])?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        info!(index = %index, "Deleted local index");
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> SearchResult<bool> {
        let name = index.to_string();
        self.with_conn(move |conn| index_exists(conn, &name)).await
    }

    async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> SearchResult<()> {
        let (index, doc_type, mapping) = (index.to_string(), doc_type.to_string(), mapping.to_string());
        self.with_conn(move |conn| {
            require_index(conn, &index)?;
            conn.execute(
                "INSERT OR REPLACE INTO search_mappings(index_name,doc_type,mapping_json) VALUES(?1,?2,?3)",
                params![index, doc_type, mapping],
            )?;
            Ok(())
        })
        .await
    }

    async fn alias_targets(&self, alias: &str) -> SearchResult<Vec<String>> {
        let alias = alias.to_string();
        self.with_conn(move |conn| alias_targets(conn, &alias)).await
    }

    async fn swap_alias(&self, alias: &str, new_index: &str) -> SearchResult<()> {
        let (name, target) = (alias.to_string(), new_index.to_string());
        self.with_conn(move |conn| {
            require_index(conn, &target)?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM search_aliases WHERE alias=?1", params![name])?;
            tx.execute(
                "INSERT INTO search_aliases(alias,index_name) VALUES(?1,?2)",
                params![name, target],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        info!(alias = %alias, index = %new_index, "Alias swapped");
        Ok(())
    }

    async fn bulk(&self, actions: &[BulkAction]) -> SearchResult<()> {
        let actions = actions.to_vec();
        self.with_conn(move |conn| write_bulk(conn, &actions)).await
    }

    async fn reindex(
        &self,
        source: &str,
        dest: &str,
        doc_types: &[String],
        _timeout: Duration,
    ) -> SearchResult<()> {
        let (from, to, types) = (source.to_string(), dest.to_string(), doc_types.to_vec());
        self.with_conn(move |conn| {
            require_index(conn, &to)?;
            let sources = resolve(conn, &from)?;
            let tx = conn.transaction()?;
            for source_index in &sources {
                for doc_type in &types {
                    tx.execute(
                        "INSERT OR REPLACE INTO search_documents(index_name,doc_type,doc_id,source_json) \
                         SELECT ?1, doc_type, doc_id, source_json FROM search_documents \
                         WHERE index_name=?2 AND doc_type=?3",
                        params![to, source_index, doc_type],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        info!(source = %source, dest = %dest, doc_types = ?doc_types, "Reindexed doc types");
        Ok(())
    }

    async fn refresh(&self, index: &str) -> SearchResult<()> {
        let name = index.to_string();
        self.with_conn(move |conn| resolve(conn, &name).map(|_| ())).await
    }

    async fn count(&self, index: &str) -> SearchResult<u64> {
        let name = index.to_string();
        self.with_conn(move |conn| {
            let mut total = 0u64;
            for target in resolve(conn, &name)? {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM search_documents WHERE index_name=?1",
                    params![target],
                    |row| row.get(0),
                )?;
                total += count.max(0) as u64;
            }
            Ok(total)
        })
        .await
    }
}
