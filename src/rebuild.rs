use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    indexers::{self, CoaccusalsIndexer, Indexer},
    queries::SqlExecutor,
    search::{IndexAlias, SearchBackend},
};

/// Identifies one rebuild; every index it creates is suffixed with `run_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRun {
    pub run_id: String,
}

impl RebuildRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

impl Default for RebuildRun {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub index_prefix: String,
    pub bulk_chunk_size: usize,
    pub reindex_timeout: Duration,
}

impl SearchConfig {
    pub fn alias_name(&self, alias: &str) -> String {
        format!("{}{alias}", self.index_prefix)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            bulk_chunk_size: 1000,
            reindex_timeout: Duration::from_secs(300),
        }
    }
}

pub fn registry() -> Vec<Arc<dyn Indexer>> {
    vec![Arc::new(CoaccusalsIndexer)]
}

/// The indexers to rerun for one alias, and the doc types to carry over untouched.
#[derive(Clone)]
pub struct AliasPlan {
    pub alias: &'static str,
    pub indexers: Vec<Arc<dyn Indexer>>,
    pub migrate_doc_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasOutcome {
    pub alias: String,
    pub index: String,
    pub doc_types: Vec<String>,
    pub migrated_doc_types: Vec<String>,
    pub documents: usize,
}

/// Groups the selected indexers by alias. An empty `apps` selects everything.
pub fn plan(indexers: &[Arc<dyn Indexer>], apps: &[String], from_scratch: bool) -> Result<Vec<AliasPlan>> {
    for app in apps {
        if !indexers.iter().any(|indexer| indexer.app() == app) {
            bail!("Unknown app {app}");
        }
    }
    let selected = |indexer: &Arc<dyn Indexer>| apps.is_empty() || apps.iter().any(|app| app == indexer.app());

    let mut by_alias: BTreeMap<&'static str, AliasPlan> = BTreeMap::new();
    for indexer in indexers {
        let entry = by_alias.entry(indexer.alias()).or_insert_with(|| AliasPlan {
            alias: indexer.alias(),
            indexers: Vec::new(),
            migrate_doc_types: Vec::new(),
        });
        if selected(indexer) {
            entry.indexers.push(indexer.clone());
        } else if !from_scratch {
            entry.migrate_doc_types.push(indexer.doc_type().to_string());
        }
    }

    Ok(by_alias
        .into_values()
        .filter(|plan| !plan.indexers.is_empty())
        .collect())
}

pub async fn rebuild_alias(
    plan: &AliasPlan,
    run: &RebuildRun,
    config: &SearchConfig,
    executor: &dyn SqlExecutor,
    backend: &dyn SearchBackend,
) -> Result<AliasOutcome> {
    let alias = IndexAlias::new(config.alias_name(plan.alias), run, config.reindex_timeout);
    info!(
        alias = %alias.name(),
        index = %alias.new_index_name(),
        indexers = plan.indexers.len(),
        migrate = ?plan.migrate_doc_types,
        "Rebuilding alias"
    );

    let documents = alias
        .indexing(backend, || async {
            alias.migrate(backend, &plan.migrate_doc_types).await?;
            let mut total = 0;
            for indexer in &plan.indexers {
                total += indexers::reindex(
                    indexer.as_ref(),
                    executor,
                    backend,
                    alias.new_index_name(),
                    config.bulk_chunk_size,
                )
                .await?;
            }
            Ok(total)
        })
        .await?;

    Ok(AliasOutcome {
        alias: alias.name().to_string(),
        index: alias.new_index_name().to_string(),
        doc_types: plan
            .indexers
            .iter()
            .map(|indexer| indexer.doc_type().to_string())
            .collect(),
        migrated_doc_types: plan.migrate_doc_types.clone(),
        documents,
    })
}

/// Reported by `rebuild` around each alias.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildEvent {
    AliasStarted {
        position: usize,
        total: usize,
        alias: &'static str,
    },
    AliasFinished(AliasOutcome),
}

/// Rebuilds the planned aliases in order. When `on_event` yields `false` no further
/// alias is started; aliases already swapped stay swapped.
pub async fn rebuild<F, Fut>(
    plans: &[AliasPlan],
    run: &RebuildRun,
    config: &SearchConfig,
    executor: &dyn SqlExecutor,
    backend: &dyn SearchBackend,
    mut on_event: F,
) -> Result<Vec<AliasOutcome>>
where
    F: FnMut(RebuildEvent) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut outcomes = Vec::with_capacity(plans.len());
    for (position, plan) in plans.iter().enumerate() {
        let started = RebuildEvent::AliasStarted {
            position,
            total: plans.len(),
            alias: plan.alias,
        };
        if !on_event(started).await? {
            info!(alias = plan.alias, run_id = %run.run_id, "Rebuild stopped");
            break;
        }

        let outcome = rebuild_alias(plan, run, config, executor, backend).await?;
        outcomes.push(outcome.clone());
        if !on_event(RebuildEvent::AliasFinished(outcome)).await? {
            break;
        }
    }
    Ok(outcomes)
}
