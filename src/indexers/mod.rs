pub mod coaccusals;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::{
    queries::{Document, SqlExecutor},
    search::{BulkAction, SearchBackend},
};

pub use coaccusals::CoaccusalsIndexer;

/// Turns database rows into documents of one doc type under one alias.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Group name used to select indexers for a rebuild, e.g. `officers`.
    fn app(&self) -> &'static str;

    fn doc_type(&self) -> &'static str;

    /// Unprefixed alias the documents are served from.
    fn alias(&self) -> &'static str;

    /// When set, documents are appended to this array property of their parent instead
    /// of being indexed on their own.
    fn parent_doc_type_property(&self) -> Option<&'static str> {
        None
    }

    fn mapping(&self) -> Value;

    async fn extract(&self, executor: &dyn SqlExecutor) -> Result<Vec<Document>>;
}

fn document_id(doc: &Document) -> Option<String> {
    match doc.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

pub fn bulk_actions(indexer: &dyn Indexer, docs: Vec<Document>, index: &str) -> Result<Vec<BulkAction>> {
    docs.into_iter()
        .map(|doc| {
            let id = document_id(&doc);
            match indexer.parent_doc_type_property() {
                Some(property) => {
                    let id = id.with_context(|| {
                        format!("{} document without id cannot join its parent", indexer.doc_type())
                    })?;
                    Ok(BulkAction::Upsert {
                        index: index.to_string(),
                        doc_type: indexer.doc_type().to_string(),
                        id,
                        property: property.to_string(),
                        doc,
                    })
                }
                None => Ok(BulkAction::Index {
                    index: index.to_string(),
                    doc_type: indexer.doc_type().to_string(),
                    id,
                    source: doc,
                }),
            }
        })
        .collect()
}

/// Extracts every document and writes it into `index` in chunks of `chunk_size`.
pub async fn reindex(
    indexer: &dyn Indexer,
    executor: &dyn SqlExecutor,
    backend: &dyn SearchBackend,
    index: &str,
    chunk_size: usize,
) -> Result<usize> {
    if indexer.parent_doc_type_property().is_none() {
        backend
            .put_mapping(index, indexer.doc_type(), &indexer.mapping())
            .await
            .with_context(|| format!("Failed creating mapping for {}", indexer.doc_type()))?;
    }

    let docs = indexer
        .extract(executor)
        .await
        .with_context(|| format!("Failed extracting {}", indexer.doc_type()))?;
    let actions = bulk_actions(indexer, docs, index)?;
    let total = actions.len();

    for chunk in actions.chunks(chunk_size.max(1)) {
        backend
            .bulk(chunk)
            .await
            .with_context(|| format!("Bulk write into {index} failed"))?;
    }

    info!(doc_type = %indexer.doc_type(), index = %index, docs = total, "Indexed documents");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        queries::executor::FakeExecutor,
        search::{SearchResult, SqliteBackend},
    };

    struct StaticIndexer {
        parent: Option<&'static str>,
        docs: Vec<Value>,
    }

    #[async_trait]
    impl Indexer for StaticIndexer {
        fn app(&self) -> &'static str {
            "test"
        }

        fn doc_type(&self) -> &'static str {
            "my_doc_type"
        }

        fn alias(&self) -> &'static str {
            "test"
        }

        fn parent_doc_type_property(&self) -> Option<&'static str> {
            self.parent
        }

        fn mapping(&self) -> Value {
            json!({"properties": {"a": {"type": "keyword"}}})
        }

        async fn extract(&self, _executor: &dyn SqlExecutor) -> Result<Vec<Document>> {
            Ok(self
                .docs
                .iter()
                .filter_map(|doc| doc.as_object().cloned())
                .collect())
        }
    }

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values.into_iter().filter_map(|v| v.as_object().cloned()).collect()
    }

    #[test]
    fn index_action_without_id() {
        let indexer = StaticIndexer { parent: None, docs: Vec::new() };
        let actions = bulk_actions(&indexer, docs(vec![json!({"a": "b"})]), "new_index_name").unwrap();
        assert_eq!(
            actions,
            vec![BulkAction::Index {
                index: "new_index_name".into(),
                doc_type: "my_doc_type".into(),
                id: None,
                source: docs(vec![json!({"a": "b"})]).remove(0),
            }]
        );
    }

    #[test]
    fn index_action_takes_id_from_document() {
        let indexer = StaticIndexer { parent: None, docs: Vec::new() };
        let actions =
            bulk_actions(&indexer, docs(vec![json!({"a": "b", "id": 1})]), "new_index_name").unwrap();
        assert!(matches!(&actions[0], BulkAction::Index { id: Some(id), .. } if id == "1"));
    }

    #[test]
    fn parent_property_turns_into_upsert() {
        let indexer = StaticIndexer { parent: Some("children"), docs: Vec::new() };
        let actions =
            bulk_actions(&indexer, docs(vec![json!({"a": "b", "id": 1})]), "new_index_name").unwrap();
        assert_eq!(
            actions,
            vec![BulkAction::Upsert {
                index: "new_index_name".into(),
                doc_type: "my_doc_type".into(),
                id: "1".into(),
                property: "children".into(),
                doc: docs(vec![json!({"a": "b", "id": 1})]).remove(0),
            }]
        );

        assert!(bulk_actions(&indexer, docs(vec![json!({"a": "b"})]), "x").is_err());
    }

    struct CountingBackend {
        inner: SqliteBackend,
        bulk_calls: AtomicUsize,
        mappings: AtomicUsize,
    }

    #[async_trait]
    impl SearchBackend for CountingBackend {
        async fn create_index(&self, index: &str) -> SearchResult<()> {
            self.inner.create_index(index).await
        }

        async fn delete_index(&self, index: &str) -> SearchResult<()> {
            self.inner.delete_index(index).await
        }

        async fn index_exists(&self, index: &str) -> SearchResult<bool> {
            self.inner.index_exists(index).await
        }

        async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> SearchResult<()> {
            self.mappings.fetch_add(1, Ordering::SeqCst);
            self.inner.put_mapping(index, doc_type, mapping).await
        }

        async fn alias_targets(&self, alias: &str) -> SearchResult<Vec<String>> {
            self.inner.alias_targets(alias).await
        }

        async fn swap_alias(&self, alias: &str, new_index: &str) -> SearchResult<()> {
            self.inner.swap_alias(alias, new_index).await
        }

        async fn bulk(&self, actions: &[BulkAction]) -> SearchResult<()> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.bulk(actions).await
        }

        async fn reindex(
            &self,
            source: &str,
            dest: &str,
            doc_types: &[String],
            timeout: std::time::Duration,
        ) -> SearchResult<()> {
            self.inner.reindex(source, dest, doc_types, timeout).await
        }

        async fn refresh(&self, index: &str) -> SearchResult<()> {
            self.inner.refresh(index).await
        }

        async fn count(&self, index: &str) -> SearchResult<u64> {
            self.inner.count(index).await
        }
    }

    #[tokio::test]
    async fn reindex_writes_in_chunks() {
        let backend = CountingBackend {
            inner: SqliteBackend::open_in_memory().unwrap(),
            bulk_calls: AtomicUsize::new(0),
            mappings: AtomicUsize::new(0),
        };
        backend.create_index("idx").await.unwrap();
        let indexer = StaticIndexer {
            parent: None,
            docs: (1..=5).map(|id| json!({"id": id})).collect(),
        };

        let total = reindex(&indexer, &FakeExecutor::new(), &backend, "idx", 2)
            .await
            .unwrap();

        assert_eq!(total, 5);
        assert_eq!(backend.bulk_calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.mappings.load(Ordering::SeqCst), 1);
        assert_eq!(backend.count("idx").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn parent_indexers_skip_mapping() {
        let backend = CountingBackend {
            inner: SqliteBackend::open_in_memory().unwrap(),
            bulk_calls: AtomicUsize::new(0),
            mappings: AtomicUsize::new(0),
        };
        backend.create_index("idx").await.unwrap();
        let indexer = StaticIndexer {
            parent: Some("children"),
            docs: vec![json!({"id": 1}), json!({"id": 1})],
        };

        reindex(&indexer, &FakeExecutor::new(), &backend, "idx", 1000)
            .await
            .unwrap();

        assert_eq!(backend.mappings.load(Ordering::SeqCst), 0);
        assert_eq!(
            backend.inner.get_document("idx", "my_doc_type", "1").await.unwrap(),
            Some(json!({"id": 1, "children": [{"id": 1}, {"id": 1}]}))
        );
    }
}
