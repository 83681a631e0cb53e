use axum::{routing::get, routing::post, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::scheduler::SchedulerHandle;

use super::api::snapshots as snapshot_handlers;
use super::api::status as status_handlers;
use super::api::visibility as visibility_handlers;
use super::api_doc::ApiDoc;
use super::auth::AppState;
use super::config::Config;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(status_handlers::health))
        // Public read endpoints
        .route(
            "/api/visibility/latest",
            get(visibility_handlers::latest),
        )
        .route("/api/snapshots", get(snapshot_handlers::list_snapshots))
        .route("/api/snapshots/{id}", get(snapshot_handlers::get_snapshot))
        // Authenticated endpoints
        .route(
            "/api/snapshots/force",
            post(snapshot_handlers::force_snapshot),
        )
        .route("/api/status", get(status_handlers::status))
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server<F>(
    config: Arc<Config>,
    scheduler: SchedulerHandle,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = config.web.bind.clone();
    let app = router(AppState { config, scheduler });

    log::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
