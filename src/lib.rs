pub mod api;
pub mod auth;
pub mod config;
pub mod indexers;
pub mod models;
pub mod percentile;
pub mod queries;
pub mod queue;
pub mod rebuild;
pub mod schema;
pub mod search;
pub mod social_graph;

use std::{collections::HashMap, sync::Arc};

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::{mpsc, RwLock};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use config::Config;
use indexers::Indexer;
use models::JobRecord;
use search::SearchBackend;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    pub queue_tx: mpsc::Sender<String>,
    pub indexers: Arc<Vec<Arc<dyn Indexer>>>,
    pub backend: Arc<dyn SearchBackend>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/v1/rebuilds", post(api::create_rebuild))
        .route(
            "/v1/rebuilds/{job_id}",
            get(api::get_rebuild).delete(api::cancel_rebuild),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state(retention_seconds: u64) -> (AppState, mpsc::Receiver<String>) {
    use std::{net::SocketAddr, path::PathBuf};

    use config::SearchBackendKind;
    use rebuild::SearchConfig;
    use search::SqliteBackend;

    let config = Config {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        api_key: "test-key".to_string(),
        api_key_is_fallback: false,
        database_url: "postgres://localhost/cpdb_test".to_string(),
        search_backend: SearchBackendKind::Sqlite,
        elasticsearch_url: "http://localhost:9200".to_string(),
        sqlite_index_path: PathBuf::from(":memory:"),
        search: SearchConfig::default(),
        retention_seconds,
        queue_capacity: 4,
    };
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    let state = AppState {
        config,
        jobs: Arc::new(RwLock::new(HashMap::new())),
        queue_tx,
        indexers: Arc::new(rebuild::registry()),
        backend: Arc::new(SqliteBackend::open_in_memory().expect("in-memory sqlite")),
    };
    (state, queue_rx)
}
