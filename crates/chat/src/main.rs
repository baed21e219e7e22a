use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use innosphere_chat::{
    auth::jwt::ChatTokenService,
    build_router,
    config::ChatConfig,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    registry::ConnectionRegistry,
    store::ChatStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ChatConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set INNOSPHERE_CHAT_JWT_SECRET in production");
    }

    let token_service =
        Arc::new(ChatTokenService::new(&config.jwt_secret).context("invalid chat JWT secret")?);

    let store = match &config.database_url {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, PoolConfig::from_env())
                .await
                .context("failed to initialize chat PostgreSQL pool")?;
            check_pool_health(&pool).await.context("chat PostgreSQL health check failed")?;
            run_migrations(&pool).await?;
            ChatStore::Postgres(pool)
        }
        None => {
            warn!("INNOSPHERE_CHAT_DATABASE_URL is not set; messages will not survive a restart");
            ChatStore::memory()
        }
    };

    let registry = ConnectionRegistry::new();
    let app = build_router(token_service, store, registry);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind chat listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat relay");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat relay exited unexpectedly")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
