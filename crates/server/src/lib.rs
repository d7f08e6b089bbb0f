use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

use handlers::ws::RoomRegistry;
use services::storage::ObjectStore;

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    /// None when no object store endpoint is configured; backups then report
    /// "skipped" and uploads are refused.
    pub storage: Option<ObjectStore>,
    pub rooms: RoomRegistry,
}

pub fn build_router(state: AppState) -> Router {
    // Everything except registration/login requires a bearer token
    let protected_routes = Router::new()
        .nest("/floorplans", routes::floorplans::router())
        .nest("/elements", routes::elements::router())
        .nest("/documents", routes::documents::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .merge(protected_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/floorplan/:floorplan_id", get(handlers::ws::floorplan_ws))
        .nest("/api", api_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}
