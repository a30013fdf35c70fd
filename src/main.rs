use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use warden::{
    create_router,
    rbac::seed::{seed_admin, seed_defaults},
    store::{create_db_pool, CredentialStore, MemoryStore, PgStore},
    telemetry::{init_telemetry, shutdown_telemetry},
    AppState, Config,
};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config) {
        eprintln!("Failed to initialise logging: {e}");
        std::process::exit(1);
    }

    info!(
        service = %config.telemetry.service_name,
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting server"
    );

    for issue in config.validate_for_production() {
        warn!(issue = %issue, "Configuration warning");
    }

    let store: Arc<dyn CredentialStore> = match config.database.url.as_deref() {
        Some(url) => {
            info!(
                database_url = %url.split('@').next_back().unwrap_or("***"),
                max_connections = config.database.max_connections,
                "Connecting to database"
            );
            match create_db_pool(url, &config.database) {
                Ok(pool) => Arc::new(PgStore::new(pool)),
                Err(e) => {
                    error!(error = %e, "Failed to create database pool");
                    std::process::exit(1);
                }
            }
        }
        None => {
            warn!("DATABASE_URL is unset, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, &config);

    if config.auth.seed_defaults {
        if let Err(e) = seed_defaults(&state.registry, &config.auth.default_role).await {
            error!(error = %e, "Failed to seed default roles");
            std::process::exit(1);
        }
    }

    if let Some(admin) = &config.auth.seed_admin {
        if let Err(e) =
            seed_admin(&state.registry, state.store.as_ref(), state.hasher, admin).await
        {
            error!(error = %e, email = %admin.email, "Failed to seed admin user");
            std::process::exit(1);
        }
    }

    let app = create_router(state);

    let http_addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %http_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %http_addr,
        docs_url = %format!("http://{}/swagger-ui", http_addr),
        "HTTP server ready"
    );

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(e) = result {
        error!(error = %e, "HTTP server error");
    }

    shutdown_telemetry();

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for CTRL+C, shutting down");
        }
    }
}
