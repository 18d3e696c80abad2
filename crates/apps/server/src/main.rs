use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use catalog::{Catalog, CatalogStore, InMemoryCatalogStore};
use catalog_sqlite::SqliteCatalogStore;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod billing;
mod config;
mod error;
mod identity;
mod layers;
mod uploads;
mod workspaces;


use auth::TokenKeys;
use config::ServerConfig;
use identity::{HttpIdentityProvider, IdentityProvider};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub tokens: Arc<TokenKeys>,
    pub identity: Arc<dyn IdentityProvider>,
    pub http: reqwest::Client,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CatalogStore>,
        identity: Arc<dyn IdentityProvider>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            catalog: Catalog::new(store),
            tokens: Arc::new(TokenKeys::new(
                config.jwt_secret.as_bytes(),
                config.token_ttl_minutes,
            )),
            identity,
            http,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ping", get(ping))
        .route("/api/oauth-config", get(auth::oauth_config))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", get(auth::logout))
        .route("/api/auth/:provider", post(auth::login))
        .route(
            "/api/layers",
            get(layers::list_layers).post(layers::create_layer),
        )
        .route("/api/layers/categories", get(layers::categories))
        .route("/api/layers/licenses", get(layers::licenses))
        .route(
            "/api/layers/:id",
            get(layers::get_layer)
                .put(layers::update_layer)
                .delete(layers::delete_layer),
        )
        .route(
            "/api/layers/:id/rate",
            post(layers::rate_layer).delete(layers::remove_rating),
        )
        .route("/api/layers/:id/upload", post(uploads::upload_file))
        .route("/api/layers/:id/add-url", post(uploads::add_url))
        .route("/api/layers/:id/file", get(uploads::download_file))
        .route("/api/workspaces/me", get(workspaces::my_workspace))
        .route(
            "/api/workspaces/me/layers",
            get(workspaces::my_workspace_layers),
        )
        .route("/api/billing/webhook", post(billing::webhook))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = ServerConfig::from_env()?;
    if config.jwt_secret_generated {
        warn!("JWT_SECRET_KEY not set; tokens will not survive a restart");
    }
    if !config.oauth.any() {
        warn!("no OAuth client ids configured; sign-in is disabled in the web client");
    }
    if config.billing_webhook_secret.is_none() {
        warn!("BILLING_WEBHOOK_SECRET not set; billing webhook answers 503");
    }

    let store = open_store(&config).await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| format!("failed to build http client: {e}"))?;
    let identity = Arc::new(HttpIdentityProvider::new(http.clone()));
    let addr = config.addr;
    let sweep_every = config.plan_sweep_interval_secs;
    let state = AppState::new(config, store, identity, http);

    let sweep = (sweep_every > 0).then(|| {
        billing::spawn_plan_sweep(state.catalog.clone(), Duration::from_secs(sweep_every))
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    info!("layer catalog listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"))?;

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    info!("layer catalog stopped");
    Ok(())
}

async fn open_store(config: &ServerConfig) -> Result<Arc<dyn CatalogStore>, String> {
    if config.uses_memory_store() {
        warn!("using the in-memory catalog store; data is lost on exit");
        return Ok(Arc::new(InMemoryCatalogStore::new()));
    }
    if let Some(dir) = config::sqlite_parent_dir(&config.database_url) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    }
    let store = SqliteCatalogStore::open(&config.database_url)
        .await
        .map_err(|e| format!("failed to open {}: {e}", config.database_url))?;
    info!(url = %config.database_url, "catalog database ready");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}
