//! HTTP API.
//!
//! JSON over axum. All routes except `/health`, `/auth/register` and
//! `/auth/token` require `Authorization: Bearer <token>`.
//!
//! # Endpoints
//!
//! | Method | Path | Access |
//! |--------|------|--------|
//! | `GET`  | `/health` | public |
//! | `POST` | `/auth/register` | public |
//! | `POST` | `/auth/token` | public |
//! | `GET`  | `/auth/me` | user |
//! | `POST` | `/upload` | user |
//! | `GET`  | `/upload/{id}/status` | owner |
//! | `GET`  | `/files` | user |
//! | `GET` / `DELETE` | `/files/{id}` | owner |
//! | `POST` | `/files/{id}/reprocess` | owner |
//! | `POST` | `/process/{id}` | owner |
//! | `POST` | `/process/{id}/sync` | owner |
//! | `GET`  | `/chunks` | admin |
//! | `GET`  | `/chunks/{id}` | owner or admin |
//! | `GET`  | `/chunks/file/{file_id}` | owner or admin |
//! | `GET` / `POST` | `/admin/users` | admin |
//! | `PUT` / `DELETE` | `/admin/users/{id}` | admin |
//! | `PUT`  | `/admin/users/{id}/toggle-admin` | admin |
//! | `PUT`  | `/admin/users/{id}/reset-password` | admin |
//!
//! Errors use the body described in [`error`].

pub mod documents;
pub mod error;
pub mod users;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::embedding::resolve_strategy;
use crate::ingest::Pipeline;
use crate::migrate::apply_schema;

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, pipeline: Pipeline) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            pipeline,
        }
    }

    /// Opens the database, applies the schema and builds the pipeline with
    /// the embedding strategy resolved from the environment.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        apply_schema(&pool).await?;
        let strategy = resolve_strategy(&config.embedding)?;
        tracing::info!(?strategy, "embedding strategy resolved");
        let pipeline = Pipeline::from_config(config, pool.clone(), &strategy)?;
        Ok(Self::new(config.clone(), pool, pipeline))
    }
}

/// Builds the full router. Layers for CORS and tracing are added by
/// [`run_server`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/register", post(users::register))
        .route("/auth/token", post(users::login))
        .route("/auth/me", get(users::me))
        .route("/upload", post(documents::upload))
        .route("/upload/{id}/status", get(documents::upload_status))
        .route("/files", get(documents::list_files))
        .route(
            "/files/{id}",
            get(documents::file_detail).delete(documents::delete_file),
        )
        .route("/files/{id}/reprocess", post(documents::reprocess_file))
        .route("/process/{id}", post(documents::process_file))
        .route("/process/{id}/sync", post(documents::process_file_sync))
        .route("/chunks", get(documents::list_all_chunks))
        .route("/chunks/{id}", get(documents::get_chunk))
        .route("/chunks/file/{file_id}", get(documents::file_chunks))
        .route(
            "/admin/users",
            get(users::admin_list_users).post(users::admin_create_user),
        )
        .route(
            "/admin/users/{id}",
            put(users::admin_update_user).delete(users::admin_delete_user),
        )
        .route("/admin/users/{id}/toggle-admin", put(users::admin_toggle_admin))
        .route(
            "/admin/users/{id}/reset-password",
            put(users::admin_reset_password),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    let state = AppState::from_config(config).await?;
    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory: {}",
                config.storage.upload_dir.display()
            )
        })?;

    let app = router(state)
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http());

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
