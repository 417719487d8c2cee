use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info};

use crate::queries::error::QueryResult;

/// One result row in PostgreSQL text format, `None` for SQL NULL.
pub type TextRow = Vec<Option<String>>;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn fetch_text_rows(&self, sql: &str) -> QueryResult<Vec<TextRow>>;
}

#[async_trait]
impl SqlExecutor for Client {
    async fn fetch_text_rows(&self, sql: &str) -> QueryResult<Vec<TextRow>> {
        debug!(sql = %sql, "Issuing raw query");
        let messages = self.simple_query(sql).await?;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                rows.push(
                    (0..row.len())
                        .map(|idx| row.get(idx).map(str::to_string))
                        .collect(),
                );
            }
        }
        Ok(rows)
    }
}

pub async fn connect(database_url: &str) -> QueryResult<Client> {
    info!("Connecting to database");
    let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!("Database connection closed: {err}");
        }
    });
    client
        .simple_query("SET client_min_messages TO WARNING")
        .await?;
    Ok(client)
}

/// Replays canned rows for any SQL containing a registered needle, recording every query.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FakeExecutor {
    responses: Vec<(String, Vec<TextRow>)>,
    issued: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, needle: &str, rows: Vec<TextRow>) -> Self {
        self.responses.push((needle.to_string(), rows));
        self
    }

    pub(crate) fn issued(&self) -> Vec<String> {
        self.issued.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl SqlExecutor for FakeExecutor {
    async fn fetch_text_rows(&self, sql: &str) -> QueryResult<Vec<TextRow>> {
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(sql.to_string());
        }
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) fn text_row(values: &[Option<&str>]) -> TextRow {
    values.iter().map(|v| v.map(str::to_string)).collect()
}
