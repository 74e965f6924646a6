use onboarding_service::{
    build_router,
    config::{AppConfig, StoreBackend},
    db,
    services::{
        EphemeralStore, HttpOtpNotifier, LogOtpNotifier, MemoryStore, MemoryUserRepository,
        OtpNotifier, PgUserRepository, RandomCodeGenerator, RedisStore, UserRepository,
    },
    utils::Identifier,
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const MEMORY_SWEEP_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AppConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store_backend = ?config.store_backend,
        "Starting onboarding service"
    );

    let (users, store): (Arc<dyn UserRepository>, Arc<dyn EphemeralStore>) =
        match config.store_backend {
            StoreBackend::External => {
                let pool = db::create_pool(&config.database).await?;
                db::run_migrations(&pool)
                    .await
                    .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
                let redis = RedisStore::new(&config.redis).await?;
                tracing::info!("PostgreSQL and Redis stores initialized");
                (Arc::new(PgUserRepository::new(pool)), Arc::new(redis))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory stores; state is lost on restart");
                let store = Arc::new(MemoryStore::new());
                store.spawn_sweeper(Duration::from_secs(MEMORY_SWEEP_SECONDS));
                (Arc::new(MemoryUserRepository::new()), store)
            }
        };

    let notifier: Arc<dyn OtpNotifier> = match config.notifier.url.as_deref() {
        Some(url) => Arc::new(HttpOtpNotifier::new(&config.notifier, url)?),
        None => {
            tracing::warn!("OTP_GATEWAY_URL not set; codes will not be delivered");
            Arc::new(LogOtpNotifier)
        }
    };

    let state = AppState::new(
        config.clone(),
        users,
        store,
        notifier,
        Arc::new(RandomCodeGenerator),
    )?;

    bootstrap_administrator(&state, &config).await?;

    let app = build_router(state);

    let addr: SocketAddr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Seeds the configured administrator account, if any.
async fn bootstrap_administrator(state: &AppState, config: &AppConfig) -> Result<(), AppError> {
    let (phone, email) = (config.admin.phone.as_deref(), config.admin.email.as_deref());
    if phone.is_none() && email.is_none() {
        return Ok(());
    }

    let identifier = Identifier::from_parts(phone, email).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid administrator identifier: {}", e))
    })?;

    match state.registration.bootstrap_administrator(&identifier).await? {
        Some(admin) => tracing::info!(user_id = %admin.user_id, "Administrator bootstrapped"),
        None => tracing::debug!("Administrator already present"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
