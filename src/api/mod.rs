// REST API module
// HTTP surface for packs, flows, actions and the datastore

//! # REST API
//!
//! An axum [`Router`] over a cloneable [`AppState`]. Packs register
//! themselves, publish events, TAKE and COMPLETE actions; users manage flows
//! and datastore entries.
//!
//! Every successful get/list/create response wraps its payload as
//! `{"data": ..., "links": [...]}`. Errors are returned as
//! `{"error": {"message": ..., "type": ...}}`.
//!
//! JSON bodies may also be sent as YAML with `Content-Type: application/x-yaml`.

pub mod extract;
pub mod handlers;
pub mod types;


use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::engine::{
    broker::ActionBroker,
    dispatcher::EventDispatcher,
    evaluator::StepEvaluator,
    flow_engine::{DependencyMode, FlowEngine},
    registry::PackRegistry,
    storage::{
        ActionStore, DataStore, FlowStore, InMemoryActionStore, InMemoryDataStore,
        InMemoryFlowStore, InMemoryPackStore, PackStore,
    },
    template::TemplateResolver,
};
use handlers::{
    complete_action, delete_datastore_entry, delete_flow, delete_pack, get_datastore_entry,
    get_flow, get_pack, health_check, info as service_info, list_datastore_keys, list_flows,
    list_packs, not_found, publish_event, put_datastore_entry, register_flow, register_pack,
    take_action,
};

/// Shared application state
///
/// Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PackRegistry>,
    pub flows: Arc<dyn FlowStore>,
    pub actions: Arc<dyn ActionStore>,
    pub broker: Arc<ActionBroker>,
    pub dispatcher: Arc<EventDispatcher>,
    pub datastore: Arc<dyn DataStore>,
}

impl AppState {
    /// Wire all components over the given stores
    pub fn new(
        packs: Arc<dyn PackStore>,
        flows: Arc<dyn FlowStore>,
        actions: Arc<dyn ActionStore>,
        datastore: Arc<dyn DataStore>,
        mode: DependencyMode,
    ) -> Self {
        let resolver = Arc::new(TemplateResolver::new(datastore.clone()));
        let engine = Arc::new(FlowEngine::new(
            actions.clone(),
            StepEvaluator::new(resolver),
            mode,
        ));

        Self {
            registry: Arc::new(PackRegistry::new(packs)),
            broker: Arc::new(ActionBroker::new(actions.clone())),
            dispatcher: Arc::new(EventDispatcher::new(flows.clone(), actions.clone(), engine)),
            flows,
            actions,
            datastore,
        }
    }

    /// State backed by fresh in-memory stores
    pub fn in_memory(mode: DependencyMode) -> Self {
        Self::new(
            Arc::new(InMemoryPackStore::new()),
            Arc::new(InMemoryFlowStore::new()),
            Arc::new(InMemoryActionStore::new()),
            Arc::new(InMemoryDataStore::new()),
            mode,
        )
    }
}

/// Build the router with every route of the API
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/info", get(service_info))
        // Packs
        .route("/v1/packs", post(register_pack).get(list_packs))
        .route("/v1/packs/:id", get(get_pack).delete(delete_pack))
        .route("/v1/packs/:id/events", post(publish_event))
        .route("/v1/packs/:id/actions/take", post(take_action))
        .route(
            "/v1/packs/:id/actions/:action_id/result",
            post(complete_action),
        )
        // Flows
        .route("/v1/flows", post(register_flow).get(list_flows))
        .route("/v1/flows/:name", get(get_flow).delete(delete_flow))
        // Datastore
        .route("/v1/datastore", get(list_datastore_keys))
        .route(
            "/v1/datastore/:key",
            get(get_datastore_entry)
                .put(put_datastore_entry)
                .delete(delete_datastore_entry),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

/// HTTP server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn create_router(&self) -> Router {
        let router = create_router(self.state.clone());
        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind and serve until the process stops
    pub async fn run(self) -> anyhow::Result<()> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("🚀 packflow listening on http://{}", addr);
        info!("🔗 API endpoints:");
        info!("   POST http://{}/v1/packs", addr);
        info!("   POST http://{}/v1/packs/:id/events", addr);
        info!("   POST http://{}/v1/packs/:id/actions/take", addr);
        info!("   POST http://{}/v1/flows", addr);
        info!("   GET  http://{}/v1/info", addr);
        info!("   GET  http://{}/health", addr);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Builder pattern for the API server
pub struct ApiServerBuilder {
    config: ApiServerConfig,
    state: Option<AppState>,
}

impl ApiServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ApiServerConfig::default(),
            state: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.config.cors_enabled = enabled;
        self
    }

    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> ApiServer {
        let state = self
            .state
            .unwrap_or_else(|| AppState::in_memory(DependencyMode::default()));
        ApiServer::new(self.config, state)
    }
}

impl Default for ApiServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
