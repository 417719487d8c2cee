use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{rebuild::RebuildRun, search::SearchBackend};

/// A stable alias plus the freshly named index a rebuild writes into.
#[derive(Debug, Clone)]
pub struct IndexAlias {
    name: String,
    new_index_name: String,
    reindex_timeout: Duration,
}

impl IndexAlias {
    pub fn new(name: impl Into<String>, run: &RebuildRun, reindex_timeout: Duration) -> Self {
        let name = name.into();
        let new_index_name = format!("{name}_{}", run.run_id);
        Self {
            name,
            new_index_name,
            reindex_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn new_index_name(&self) -> &str {
        &self.new_index_name
    }

    /// Runs `work` against a new write index. On success the alias moves to it and the
    /// previous indices are dropped; on failure the write index is dropped and the alias
    /// stays where it was.
    pub async fn indexing<F, Fut, T>(&self, backend: &dyn SearchBackend, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        backend
            .create_index(&self.new_index_name)
            .await
            .with_context(|| format!("Failed creating index {}", self.new_index_name))?;

        let value = match work().await {
            Ok(value) => value,
            Err(err) => {
                warn!(alias = %self.name, index = %self.new_index_name, "Indexing failed, dropping write index");
                if let Err(cleanup) = backend.delete_index(&self.new_index_name).await {
                    warn!("Failed deleting write index {}: {cleanup}", self.new_index_name);
                }
                return Err(err);
            }
        };

        backend
            .refresh(&self.new_index_name)
            .await
            .with_context(|| format!("Failed refreshing {}", self.new_index_name))?;

        let previous = backend
            .alias_targets(&self.name)
            .await
            .with_context(|| format!("Failed reading alias {}", self.name))?;
        backend
            .swap_alias(&self.name, &self.new_index_name)
            .await
            .with_context(|| format!("Failed pointing {} at {}", self.name, self.new_index_name))?;

        for old in previous.iter().filter(|old| **old != self.new_index_name) {
            if let Err(err) = backend.delete_index(old).await {
                warn!("Failed deleting previous index {old}: {err}");
            }
        }

        info!(alias = %self.name, index = %self.new_index_name, "Alias now serves new index");
        Ok(value)
    }

    /// Carries `doc_types` over from the live alias into the write index.
    pub async fn migrate(&self, backend: &dyn SearchBackend, doc_types: &[String]) -> Result<()> {
        if doc_types.is_empty() {
            return Ok(());
        }
        if backend.alias_targets(&self.name).await?.is_empty() {
            info!(alias = %self.name, "Nothing to migrate, alias has no index yet");
            return Ok(());
        }
        backend
            .reindex(&self.name, &self.new_index_name, doc_types, self.reindex_timeout)
            .await
            .with_context(|| format!("Failed migrating {doc_types:?} into {}", self.new_index_name))?;
        Ok(())
    }
}
