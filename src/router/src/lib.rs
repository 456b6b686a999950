use anyhow::Context;
use axum::{Router, http::StatusCode, middleware, response::IntoResponse, routing::get};
use common::SeriesPolicy;
use common::auth::{Authenticator, auth_middleware};
use common::config::Configuration;
use querier::{CollectionStore, SeriesQuerier, SeriesQueryBuilder};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub mod endpoints;

pub trait RouterState: std::fmt::Debug + Clone + Send + Sync + 'static {
    fn config(&self) -> &Configuration;
    fn querier(&self) -> &dyn SeriesQuerier;
    fn authenticator(&self) -> &Arc<Authenticator>;
}

/// Shared, read-only state handed to every request
#[derive(Clone)]
pub struct ServiceState {
    config: Arc<Configuration>,
    querier: Arc<dyn SeriesQuerier>,
    authenticator: Arc<Authenticator>,
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("collections", &self.config.series.collections)
            .field("querier", &"SeriesQuerier")
            .field("authenticator", &self.authenticator)
            .finish()
    }
}

impl ServiceState {
    pub fn new(config: Configuration, querier: Arc<dyn SeriesQuerier>) -> Self {
        let authenticator = Arc::new(Authenticator::new(config.auth.clone()));

        Self {
            config: Arc::new(config),
            querier,
            authenticator,
        }
    }

    /// Validate the configuration against an already opened store and wire
    /// up the query builder. Any error here must stop the service.
    pub fn with_store(config: Configuration, store: CollectionStore) -> anyhow::Result<Self> {
        config.validate()?;
        store.ensure_exposed(&config.series.collections)?;

        let policy = Arc::new(SeriesPolicy::from_config(&config.series));
        log::info!(
            "Serving {} collection(s) with aggregation {}",
            config.series.collections.len(),
            policy.aggregation
        );

        let querier = SeriesQueryBuilder::new(store, policy);
        Ok(Self::new(config, Arc::new(querier)))
    }

    /// Open the configured data directory, then validate as [`Self::with_store`]
    pub async fn bootstrap(config: Configuration) -> anyhow::Result<Self> {
        let store = CollectionStore::open(&config.store)
            .await
            .context("Failed to open collection store")?;
        Self::with_store(config, store)
    }
}

impl RouterState for ServiceState {
    fn config(&self) -> &Configuration {
        &self.config
    }

    fn querier(&self) -> &dyn SeriesQuerier {
        self.querier.as_ref()
    }

    fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }
}

/// Create a new router instance with all routes configured
pub fn create_router<S: RouterState>(state: S) -> Router {
    let authenticator = state.authenticator().clone();
    let auth_layer =
        middleware::from_fn(move |req, next| auth_middleware(authenticator.clone(), req, next));

    Router::new()
        // Public health check endpoint (no authentication)
        .route("/health", get(health_check))
        .merge(endpoints::simplejson::router::<S>().layer(auth_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the HTTP API on `listener` until `shutdown` resolves
pub async fn serve<S: RouterState>(
    listener: TcpListener,
    state: S,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

/// Basic health check endpoint
async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
