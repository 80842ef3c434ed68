//! Room Service
//!
//! WebSocket signaling server and room/session API for the room coordinator.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing (plain or JSON)
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Open the call store (Postgres with migrations, or in-memory)
//! 5. Spawn the room registry actor
//! 6. Serve HTTP + WebSocket until SIGINT/SIGTERM
//! 7. Mark not ready, drain the registry

#![warn(clippy::pedantic)]

use room_service::actors::{ActorMetrics, RoomRegistryHandle};
use room_service::config::Config;
use room_service::gateway::{build_router, AppState};
use room_service::observability::metrics::init_metrics_recorder;
use room_service::observability::HealthState;
use room_service::store::{CallStore, MemoryCallStore, PgCallStore};

use anyhow::Context;
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the database pool to hand out a connection.
const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    init_tracing(config.log_json);

    info!("Starting Room Service");
    info!(
        bind_address = %config.bind_address,
        instance_id = %config.instance_id,
        durable_store = config.database_url.is_some(),
        db_max_connections = config.db_max_connections,
        room_code_max_attempts = config.room_code_max_attempts,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let store = open_store(&config).await?;
    let health_state = Arc::new(HealthState::new());

    let registry = RoomRegistryHandle::new(config.instance_id.clone(), ActorMetrics::new());
    let state = Arc::new(AppState::new(
        store,
        registry.clone(),
        config.room_code_max_attempts,
    ));
    let app = build_router(state, Arc::clone(&health_state), Some(metrics_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        anyhow::anyhow!("invalid bind address {}: {e}", config.bind_address)
    })?;

    // Bind before reporting ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    health_state.set_ready();
    info!(addr = %addr, "Room Service listening");

    let shutdown_health = Arc::clone(&health_state);
    let shutdown_registry = registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_health.set_not_ready();
            // Closes open signaling channels so the server can finish.
            if let Err(e) = shutdown_registry.shutdown().await {
                warn!(error = %e, "Registry shutdown failed");
            }
        })
        .await
        .context("server error")?;

    info!("Room Service shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_service=debug,rc=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Open the Postgres store when `DATABASE_URL` is set, the in-memory store
/// otherwise.
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn CallStore>> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set, using in-memory call store");
        return Ok(Arc::new(MemoryCallStore::new()));
    };

    info!("Connecting to database...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(DB_ACQUIRE_TIMEOUT)
        .connect(database_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })
        .context("failed to connect to database")?;

    let store = PgCallStore::new(pool);
    store.ping().await.context("database is not reachable")?;
    store.migrate().await.context("failed to apply migrations")?;
    info!("Database connection established, migrations applied");

    Ok(Arc::new(store))
}

/// Returns when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
