//! PostgreSQL implementation of the store traits.
//!
//! `try_claim` relies on a single conditional `UPDATE … RETURNING` statement;
//! Postgres row locking makes it atomic across pool connections and across
//! process instances. A claim has no automatic expiry: a process that crashes
//! between claiming and completing leaves the row claimed-but-undelivered
//! until an external reconciler releases it.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    ConfigDefaults, Delivery, EffectiveConfig, IdentityLink, Notification, TenantOverrides,
};

use crate::{ConfigSource, DeliveryStore, IdentityResolver, TenantDirectory};

/// sqlx-backed store over the four Herald tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    defaults: ConfigDefaults,
}

impl PgStore {
    pub fn new(pool: PgPool, defaults: ConfigDefaults) -> Self {
        Self { pool, defaults }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert a tenant's configuration overrides (used by the settings front
    /// end; the delivery core only reads them).
    pub async fn upsert_tenant_config(
        &self,
        tenant_id: &str,
        notify_destination_id: Option<&str>,
        poll_interval_secs: Option<i64>,
        message_spacing_ms: Option<i64>,
    ) -> Result<TenantOverrides, AppError> {
        let row: TenantOverrides = sqlx::query_as(
            r#"
            INSERT INTO tenant_configs (tenant_id, notify_destination_id, poll_interval_secs, message_spacing_ms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE SET
                notify_destination_id = COALESCE($2, tenant_configs.notify_destination_id),
                poll_interval_secs = COALESCE($3, tenant_configs.poll_interval_secs),
                message_spacing_ms = COALESCE($4, tenant_configs.message_spacing_ms),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(notify_destination_id)
        .bind(poll_interval_secs)
        .bind(message_spacing_ms)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(tenant = %tenant_id, "Tenant config updated");
        Ok(row)
    }

    /// Create or replace the identity link for a username.
    pub async fn upsert_link(
        &self,
        username: &str,
        external_user_id: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO identity_links (username, external_user_id)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET external_user_id = $2
            "#,
        )
        .bind(username)
        .bind(external_user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List every identity link (used by the seed tool).
    pub async fn list_links(&self) -> Result<Vec<IdentityLink>, AppError> {
        let links: Vec<IdentityLink> =
            sqlx::query_as("SELECT * FROM identity_links ORDER BY username")
                .fetch_all(&self.pool)
                .await?;

        Ok(links)
    }

    /// Remove the identity link for a username. Returns true if one existed.
    pub async fn remove_link(&self, username: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM identity_links WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert a notification content record (external-producer stand-in,
    /// used by the seed tool).
    pub async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, kind, title, summary, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.summary)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a pending delivery obligation for (notification, username).
    pub async fn insert_delivery(
        &self,
        notification_id: Uuid,
        username: &str,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notification_deliveries (id, notification_id, username, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(notification_id)
        .bind(username)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl DeliveryStore for PgStore {
    async fn fetch_pending_batch(&self, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM notification_deliveries
            WHERE delivered_at IS NULL AND claimed_at IS NULL
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn try_claim(&self, id: Uuid) -> Result<Option<Delivery>, AppError> {
        let claimed: Option<Delivery> = sqlx::query_as(
            r#"
            UPDATE notification_deliveries
            SET claimed_at = NOW()
            WHERE id = $1 AND delivered_at IS NULL AND claimed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    async fn release_claim(&self, ids: &[Uuid]) -> Result<(), AppError> {
        sqlx::query("UPDATE notification_deliveries SET claimed_at = NULL WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_delivered(&self, ids: &[Uuid], message_id: &str) -> Result<(), AppError> {
        // delivered_at is write-once: the IS NULL guard makes re-invocation
        // after a partial failure a no-op.
        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET delivered_at = NOW(), delivered_message_id = $2, claimed_at = NULL
            WHERE id = ANY($1) AND delivered_at IS NULL
            "#,
        )
        .bind(ids)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, ids: &[Uuid], error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET last_attempt_at = NOW(), error = $2, attempts = attempts + 1, claimed_at = NULL
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_notifications(&self, ids: &[Uuid]) -> Result<Vec<Notification>, AppError> {
        let notifications: Vec<Notification> =
            sqlx::query_as("SELECT * FROM notifications WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(notifications)
    }
}

#[async_trait]
impl IdentityResolver for PgStore {
    async fn resolve(&self, username: &str) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT external_user_id FROM identity_links WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }
}

#[async_trait]
impl ConfigSource for PgStore {
    async fn effective(&self, tenant_id: &str) -> Result<EffectiveConfig, AppError> {
        let overrides: Option<TenantOverrides> =
            sqlx::query_as("SELECT * FROM tenant_configs WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(EffectiveConfig::resolve(
            tenant_id,
            overrides.as_ref(),
            &self.defaults,
        ))
    }
}

#[async_trait]
impl TenantDirectory for PgStore {
    async fn tenants(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT tenant_id FROM tenant_configs ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}
