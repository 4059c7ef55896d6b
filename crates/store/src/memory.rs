//! In-memory implementation of the store traits.
//!
//! Backs the scheduler and sender tests and local development without a
//! database. Semantics mirror [`crate::postgres::PgStore`] exactly, including
//! the claim precondition and the write-once guard on `delivered_at`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    ConfigDefaults, Delivery, EffectiveConfig, Notification, TenantOverrides,
};

use crate::{ConfigSource, DeliveryStore, IdentityResolver, TenantDirectory};

#[derive(Default)]
struct Inner {
    notifications: HashMap<Uuid, Notification>,
    deliveries: HashMap<Uuid, Delivery>,
    links: HashMap<String, String>,
    tenants: HashMap<String, TenantOverrides>,
}

/// Map-backed store guarded by a single async mutex, so every operation is
/// atomic with respect to concurrent callers — the same guarantee the
/// Postgres backend gets from conditional updates.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    defaults: ConfigDefaults,
}

impl MemoryStore {
    pub fn new(defaults: ConfigDefaults) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            defaults,
        }
    }

    pub async fn add_notification(&self, title: &str, summary: &str) -> Uuid {
        let id = Uuid::new_v4();
        let notification = Notification {
            id,
            kind: None,
            title: title.to_string(),
            summary: summary.to_string(),
            created_at: Utc::now(),
        };
        self.inner.lock().await.notifications.insert(id, notification);
        id
    }

    pub async fn add_delivery(&self, notification_id: Uuid, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        let delivery = Delivery {
            id,
            notification_id,
            username: username.to_string(),
            delivered_at: None,
            delivered_message_id: None,
            attempts: 0,
            last_attempt_at: None,
            error: None,
            claimed_at: None,
            created_at: Utc::now(),
        };
        self.inner.lock().await.deliveries.insert(id, delivery);
        id
    }

    pub async fn link(&self, username: &str, external_user_id: &str) {
        self.inner
            .lock()
            .await
            .links
            .insert(username.to_string(), external_user_id.to_string());
    }

    pub async fn set_tenant(
        &self,
        tenant_id: &str,
        notify_destination_id: Option<&str>,
        poll_interval_secs: Option<i64>,
        message_spacing_ms: Option<i64>,
    ) {
        let overrides = TenantOverrides {
            tenant_id: tenant_id.to_string(),
            notify_destination_id: notify_destination_id.map(String::from),
            poll_interval_secs,
            message_spacing_ms,
            updated_at: Utc::now(),
        };
        self.inner
            .lock()
            .await
            .tenants
            .insert(tenant_id.to_string(), overrides);
    }

    pub async fn delivery(&self, id: Uuid) -> Option<Delivery> {
        self.inner.lock().await.deliveries.get(&id).cloned()
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn fetch_pending_batch(&self, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<&Delivery> =
            inner.deliveries.values().filter(|d| d.is_pending()).collect();
        pending.sort_by_key(|d| d.created_at);
        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|d| d.id)
            .collect())
    }

    async fn try_claim(&self, id: Uuid) -> Result<Option<Delivery>, AppError> {
        let mut inner = self.inner.lock().await;
        match inner.deliveries.get_mut(&id) {
            Some(d) if d.is_pending() => {
                d.claimed_at = Some(Utc::now());
                Ok(Some(d.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_claim(&self, ids: &[Uuid]) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            if let Some(d) = inner.deliveries.get_mut(id) {
                d.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn mark_delivered(&self, ids: &[Uuid], message_id: &str) -> Result<(), AppError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        for id in ids {
            if let Some(d) = inner.deliveries.get_mut(id)
                && d.delivered_at.is_none()
            {
                d.delivered_at = Some(now);
                d.delivered_message_id = Some(message_id.to_string());
                d.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, ids: &[Uuid], error: &str) -> Result<(), AppError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        for id in ids {
            if let Some(d) = inner.deliveries.get_mut(id) {
                d.last_attempt_at = Some(now);
                d.error = Some(error.to_string());
                d.attempts += 1;
                d.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn load_notifications(&self, ids: &[Uuid]) -> Result<Vec<Notification>, AppError> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.notifications.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl IdentityResolver for MemoryStore {
    async fn resolve(&self, username: &str) -> Result<Option<String>, AppError> {
        Ok(self.inner.lock().await.links.get(username).cloned())
    }
}

#[async_trait]
impl ConfigSource for MemoryStore {
    async fn effective(&self, tenant_id: &str) -> Result<EffectiveConfig, AppError> {
        let inner = self.inner.lock().await;
        Ok(EffectiveConfig::resolve(
            tenant_id,
            inner.tenants.get(tenant_id),
            &self.defaults,
        ))
    }
}

#[async_trait]
impl TenantDirectory for MemoryStore {
    async fn tenants(&self) -> Result<Vec<String>, AppError> {
        let mut tenants: Vec<String> = self.inner.lock().await.tenants.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}
