use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::search::{BulkAction, SearchBackend, SearchError, SearchResult};

pub struct ElasticsearchBackend {
    client: Client,
    base_url: String,
}

impl ElasticsearchBackend {
    pub fn new(base_url: &str, timeout: Duration) -> SearchResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

async fn check(response: Response, operation: &str) -> SearchResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Status {
        operation: operation.to_string(),
        status,
        body,
    })
}

fn upsert_script(property: &str) -> String {
    format!(
        "if (!ctx._source.containsKey('{property}')) {{ ctx._source.{property} = [] }} \
         ctx._source.{property}.add(params.new_doc)"
    )
}

/// Renders bulk actions as the newline-delimited body `_bulk` expects.
pub fn bulk_body(actions: &[BulkAction]) -> SearchResult<String> {
    let mut body = String::new();
    for action in actions {
        let (meta, payload) = match action {
            BulkAction::Index {
                index,
                doc_type,
                id,
                source,
            } => {
                let mut meta = json!({ "_index": index, "_type": doc_type });
                if let Some(id) = id {
                    meta["_id"] = json!(id);
                }
                (json!({ "index": meta }), Value::Object(source.clone()))
            }
            BulkAction::Upsert {
                index,
                doc_type,
                id,
                property,
                doc,
            } => {
                let upsert_id = doc.get("id").cloned().unwrap_or_else(|| json!(id));
                (
                    json!({ "update": { "_index": index, "_type": doc_type, "_id": id } }),
                    json!({
                        "upsert": { "id": upsert_id, property.as_str(): [doc] },
                        "script": {
                            "lang": "painless",
                            "source": upsert_script(property),
                            "params": { "new_doc": doc },
                        },
                    }),
                )
            }
        };
        body.push_str(&serde_json::to_string(&meta)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&payload)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn create_index(&self, index: &str) -> SearchResult<()> {
        info!(index = %index, "Creating index");
        let response = self.client.put(self.url(index)).send().await?;
        check(response, "create index").await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> SearchResult<()> {
        info!(index = %index, "Deleting index");
        let response = self.client.delete(self.url(index)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, "delete index").await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> SearchResult<bool> {
        let response = self.client.head(self.url(index)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => check(response, "index exists").await.map(|_| false),
        }
    }

    async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> SearchResult<()> {
        let response = self
            .client
            .put(self.url(&format!("{index}/_mapping/{doc_type}")))
            .json(mapping)
            .send()
            .await?;
        check(response, "put mapping").await?;
        Ok(())
    }

    async fn alias_targets(&self, alias: &str) -> SearchResult<Vec<String>> {
        let response = self
            .client
            .get(self.url(&format!("_alias/{alias}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let data: Value = check(response, "get alias").await?.json().await?;
        Ok(data
            .as_object()
            .map(|indices| indices.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn swap_alias(&self, alias: &str, new_index: &str) -> SearchResult<()> {
        let mut actions = self
            .alias_targets(alias)
            .await?
            .into_iter()
            .filter(|index| index != new_index)
            .map(|index| json!({ "remove": { "index": index, "alias": alias } }))
            .collect::<Vec<_>>();
        actions.push(json!({ "add": { "index": new_index, "alias": alias } }));

        let response = self
            .client
            .post(self.url("_aliases"))
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        check(response, "update aliases").await?;
        info!(alias = %alias, index = %new_index, "Alias swapped");
        Ok(())
    }

    async fn bulk(&self, actions: &[BulkAction]) -> SearchResult<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let body = bulk_body(actions)?;
        debug!(actions = actions.len(), bytes = body.len(), "Sending bulk request");
        let response = self
            .client
            .post(self.url("_bulk"))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let data: Value = check(response, "bulk").await?.json().await?;

        if data["errors"].as_bool().unwrap_or(false) {
            let first_error = data["items"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|item| item.as_object()?.values().next())
                .find_map(|result| result.get("error"))
                .cloned()
                .unwrap_or(Value::Null);
            warn!(error = %first_error, "Bulk request reported item errors");
            return Err(SearchError::Status {
                operation: "bulk".to_string(),
                status: 200,
                body: first_error.to_string(),
            });
        }
        Ok(())
    }

    async fn reindex(
        &self,
        source: &str,
        dest: &str,
        doc_types: &[String],
        timeout: Duration,
    ) -> SearchResult<()> {
        info!(source = %source, dest = %dest, doc_types = ?doc_types, "Reindexing doc types");
        let response = self
            .client
            .post(self.url("_reindex?wait_for_completion=true"))
            .timeout(timeout)
            .json(&json!({
                "source": { "index": source, "type": doc_types },
                "dest": { "index": dest, "version_type": "external" },
            }))
            .send()
            .await?;
        check(response, "reindex").await?;
        Ok(())
    }

    async fn refresh(&self, index: &str) -> SearchResult<()> {
        let response = self
            .client
            .post(self.url(&format!("{index}/_refresh")))
            .send()
            .await?;
        check(response, "refresh").await?;
        Ok(())
    }

    async fn count(&self, index: &str) -> SearchResult<u64> {
        let response = self
            .client
            .get(self.url(&format!("{index}/_count")))
            .send()
            .await?;
        let data: Value = check(response, "count").await?.json().await?;
        Ok(data["count"].as_u64().unwrap_or(0))
    }
}
