//! Populate the database with test notifications and deliveries.
//!
//! Requires at least one identity link to exist; one pending delivery is
//! created per (link, notification) pair.
//!
//! Usage: `cargo run -p herald-notifier --bin seed`

use chrono::{Duration, Utc};
use uuid::Uuid;

use herald_common::config::AppConfig;
use herald_common::db::create_pool;
use herald_common::types::Notification;
use herald_store::postgres::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seed=info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let store = PgStore::new(pool.clone(), config.defaults());

    let links = store.list_links().await?;
    tracing::info!(count = links.len(), "Found existing identity links");
    if links.is_empty() {
        tracing::warn!("No identity links registered; no deliveries will be created");
    }

    // Start from a clean slate
    sqlx::query("DELETE FROM notification_deliveries")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM notifications")
        .execute(&pool)
        .await?;

    let now = Utc::now();
    let mut notification_ids = Vec::new();
    for i in 0..3 {
        let notification = Notification {
            id: Uuid::new_v4(),
            kind: Some("test".to_string()),
            title: format!("Test Notification {}", i + 1),
            summary: format!("This is a test notification created at {}", now.to_rfc3339()),
            created_at: now - Duration::minutes(i),
        };
        store.insert_notification(&notification).await?;
        notification_ids.push(notification.id);
    }
    tracing::info!(count = notification_ids.len(), "Inserted notifications");

    let mut deliveries = 0;
    for link in &links {
        for notification_id in &notification_ids {
            store.insert_delivery(*notification_id, &link.username).await?;
            deliveries += 1;
        }
    }
    tracing::info!(count = deliveries, "Inserted pending deliveries");

    Ok(())
}
