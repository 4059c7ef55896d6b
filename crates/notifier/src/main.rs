//! Herald notifier daemon entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_common::db::create_pool;
use herald_store::postgres::PgStore;

use herald_notifier::http;
use herald_notifier::messenger::DiscordMessenger;
use herald_notifier::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info,herald_store=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let bot_token = config
        .discord_bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN environment variable is required"))?;

    // Connect to database
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgStore::new(pool, config.defaults()));
    let messenger = Arc::new(DiscordMessenger::new(bot_token));
    let mut scheduler = Scheduler::new(store, messenger, config.delivery_batch_limit);

    // Health endpoint
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health endpoint listening on {}", addr);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = scheduler.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler exited with error");
                return Err(e);
            }
        }
        result = axum::serve(listener, http::router()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Health server exited with error");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Herald notifier stopped.");
    Ok(())
}
