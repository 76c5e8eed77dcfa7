//! fedhost binary entry point

use std::sync::Arc;
use std::time::Duration;

use fedhost::service::FollowingService;
use fedhost::tenancy::{ConfigStorage, DomainRegistry, FileConfigStorage};
use fedhost::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle locks and expired documents are swept
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Start the domain registry and its configuration stream
/// 4. Build Axum router
/// 5. Start background tasks (polling, maintenance)
/// 6. Serve until Ctrl-C, then close every tenant
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("FEDHOST__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fedhost=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fedhost=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting fedhost...");

    // 2. Initialize metrics
    fedhost::metrics::init_metrics();

    // 3. Load configuration
    let config = Arc::new(config::AppConfig::load()?);
    tracing::info!(
        protocol = %config.server.protocol,
        tenants = %config.tenants.config_path.display(),
        "Configuration loaded"
    );

    // 4. Domain registry fed by the tenant configuration file
    let http_client = fedhost::build_http_client(&config.federation)?;
    let storage: Arc<dyn ConfigStorage> = Arc::new(FileConfigStorage::new(
        config.tenants.config_path.clone(),
        Duration::from_secs(config.tenants.reload_interval_seconds.max(1)),
    ));
    let registry = Arc::new(DomainRegistry::new(storage.clone(), config.clone(), http_client));
    tokio::spawn(registry.clone().run(storage.subscribe()));

    let state = AppState::new(config.clone(), registry.clone());

    // 5. Build Axum router
    let app = fedhost::build_router(state.clone());

    // 6. Start background tasks
    spawn_poll_task(state.clone());
    spawn_maintenance_task(state.clone());

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Spawn background task re-polling `Poll` followings on every tenant
fn spawn_poll_task(state: AppState) {
    tokio::spawn(async move {
        let poll_interval = Duration::from_secs(state.config.federation.poll_interval_seconds.max(1));
        let mut interval = tokio::time::interval(poll_interval.min(MAINTENANCE_INTERVAL));

        loop {
            interval.tick().await;

            for tenant in state.registry.tenants().await {
                let Ok(_guard) = tenant.begin_request() else {
                    continue;
                };
                let followings = FollowingService::new(tenant.clone(), state.locks.clone());
                match followings.poll_due(poll_interval).await {
                    Ok(0) => {}
                    Ok(polled) => {
                        tracing::info!(hostname = %tenant.hostname(), polled, "Scheduled polls finished")
                    }
                    Err(error) => {
                        tracing::error!(hostname = %tenant.hostname(), %error, "Scheduled polls failed")
                    }
                }
            }
        }
    });

    tracing::info!("Poll task spawned");
}

/// Spawn background task sweeping idle locks and expired documents
fn spawn_maintenance_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        // Consume the immediate first tick
        interval.tick().await;

        loop {
            interval.tick().await;

            let evicted = state.locks.sweep();
            let mut pruned = 0;
            for tenant in state.registry.tenants().await {
                pruned += tenant.resolver().prune_expired().await;
            }
            tracing::debug!(evicted, pruned, "Maintenance sweep");
        }
    });

    tracing::info!("Maintenance task spawned");
}
