//! Delivery store adapter — the correctness-critical boundary of Herald.
//!
//! All cross-process synchronization is pushed into the store's atomic
//! conditional-update primitive (`try_claim`); the application layer holds no
//! locks and performs no in-memory cross-process coordination. Multi-instance
//! deployment is expected and must be safe.
//!
//! Two implementations:
//! - [`postgres::PgStore`] — sqlx/PostgreSQL, the production backend
//! - [`memory::MemoryStore`] — in-process maps, for tests and local development

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Delivery, EffectiveConfig, Notification};

/// Atomic claim, release, and completion operations over delivery records.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Return up to `limit` delivery ids that are neither delivered nor
    /// claimed, oldest first. This is a snapshot read; races with concurrent
    /// claimers are expected and resolved by `try_claim`.
    async fn fetch_pending_batch(&self, limit: i64) -> Result<Vec<Uuid>, AppError>;

    /// Atomically transition a delivery from unclaimed-and-undelivered to
    /// claimed, returning the updated record. Returns `None` when the
    /// precondition no longer holds (already claimed or already delivered).
    ///
    /// This must be a single atomic conditional update: the store is the sole
    /// point of mutual exclusion across process instances.
    async fn try_claim(&self, id: Uuid) -> Result<Option<Delivery>, AppError>;

    /// Clear `claimed_at` on the given ids without touching `delivered_at` or
    /// `attempts`, returning the batch to pending state.
    async fn release_claim(&self, ids: &[Uuid]) -> Result<(), AppError>;

    /// Record a successful send: set `delivered_at` and the message id, clear
    /// the claim. Write-once on `delivered_at` — a second call for the same id
    /// is a no-op.
    async fn mark_delivered(&self, ids: &[Uuid], message_id: &str) -> Result<(), AppError>;

    /// Record a failed attempt: set `last_attempt_at` and `error`, increment
    /// `attempts`, clear the claim so the batch is retried on a later pass.
    async fn mark_failed(&self, ids: &[Uuid], error: &str) -> Result<(), AppError>;

    /// Load notification content for rendering.
    async fn load_notifications(&self, ids: &[Uuid]) -> Result<Vec<Notification>, AppError>;
}

/// Maps an internal username to an external recipient identifier.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, username: &str) -> Result<Option<String>, AppError>;
}

/// Resolves effective per-tenant settings by overlaying stored overrides on
/// process-wide defaults. Absence of an override row yields the defaults.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn effective(&self, tenant_id: &str) -> Result<EffectiveConfig, AppError>;
}

/// Enumerates the tenants the scheduler iterates on every tick.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenants(&self) -> Result<Vec<String>, AppError>;
}
