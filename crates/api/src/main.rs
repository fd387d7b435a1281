use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use storyreel_api::config::ServerConfig;
use storyreel_api::router::build_app_router;
use storyreel_api::state::AppState;
use storyreel_db::{JobStore, MemoryStore, PgStore};
use storyreel_events::{EventBus, EventLogger};
use storyreel_pipeline::{ArtifactCache, PipelineConfig};
use storyreel_providers::ProviderConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "storyreel_api=debug,storyreel_worker=debug,storyreel_pipeline=debug,tower_http=debug"
            .into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let providers = ProviderConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        render_model = providers.default_render_model.key(),
        audio_enabled = pipeline.audio.enabled,
        "Loaded configuration"
    );
    if providers.api_token.is_empty() {
        tracing::warn!("REPLICATE_API_TOKEN is empty; provider calls will be rejected");
    }

    // --- Store ---
    let (store, pool): (Arc<dyn JobStore>, Option<storyreel_db::DbPool>) = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = storyreel_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            storyreel_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            storyreel_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            let store: Arc<dyn JobStore> = Arc::new(PgStore::new(pool.clone()));
            (store, Some(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
            let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
            (store, None)
        }
    };

    // --- Artifact cache ---
    let cancel = CancellationToken::new();
    let cache = Arc::new(ArtifactCache::new(pipeline.cache_ttl));
    let sweeper_handle = Arc::clone(&cache).spawn_sweeper(pipeline.cache_sweep_interval, cancel.clone());

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe(), cancel.clone()));

    // --- Coordinator ---
    let coordinator = storyreel_worker::from_config(
        store,
        Arc::clone(&event_bus),
        Arc::clone(&cache),
        &providers,
        &pipeline,
    );

    // --- App state ---
    let state = AppState {
        coordinator: coordinator.clone(),
        cache,
        pool,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    if coordinator.shutdown(grace).await {
        tracing::info!("Pipeline stages drained");
    }

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
