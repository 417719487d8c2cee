use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use cpdb_indexer::{
    app_router,
    config::{Config, SearchBackendKind},
    queue, rebuild, AppState,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cpdb_indexer=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.api_key_is_fallback {
        warn!("Using generated API key; set CPDB_INDEXER_API_KEY to call the rebuild API");
    }
    if config.search_backend == SearchBackendKind::Sqlite {
        if let Some(parent) = config.sqlite_index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let backend = queue::build_backend(&config)?;

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    let state = AppState {
        config: config.clone(),
        jobs: Arc::new(RwLock::new(HashMap::new())),
        queue_tx,
        indexers: Arc::new(rebuild::registry()),
        backend,
    };

    queue::spawn_rebuild_worker(state.clone(), queue_rx);
    queue::spawn_cleanup_worker(state.clone());

    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("cpdb-indexer listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
