use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use floorsafe_server::{
    build_router, config, db, handlers::ws::create_room_registry,
    services::storage::ObjectStore, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "floorsafe_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env();

    // Initialize database
    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    // Object store for backups and uploads (optional)
    let storage = ObjectStore::from_config(&config);
    if storage.is_none() {
        tracing::warn!("no object store configured; backups and uploads are disabled");
    }

    // Per-floorplan notification rooms
    let rooms = create_room_registry();

    let state = AppState {
        db,
        config: config.clone(),
        storage,
        rooms,
    };

    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
