use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable notification content record, created by an external producer.
/// Referenced, never owned, by deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub kind: Option<String>,
    pub title: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// One row per (notification, recipient) pair: an obligation to deliver.
///
/// Invariants:
/// - `delivered_at` is write-once.
/// - `claimed_at` set with `delivered_at` unset means the row is in flight
///   and must not be claimed again.
/// - `attempts` increments only on a failed send.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub username: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_message_id: Option<String>,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// A delivery is pending when it has neither been delivered nor claimed.
    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none() && self.claimed_at.is_none()
    }
}

/// Bidirectional 1:1 mapping from an internal username to an external
/// messaging-platform user id. Read-only from the delivery core.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentityLink {
    pub username: String,
    pub external_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant configuration overrides. Absent fields fall back to the
/// process-wide defaults field by field.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantOverrides {
    pub tenant_id: String,
    pub notify_destination_id: Option<String>,
    pub poll_interval_secs: Option<i64>,
    pub message_spacing_ms: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Process-wide defaults that tenant overrides overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDefaults {
    pub notify_destination_id: Option<String>,
    pub poll_interval_secs: u64,
    pub message_spacing_ms: u64,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            notify_destination_id: None,
            poll_interval_secs: 30,
            message_spacing_ms: 1500,
        }
    }
}

/// Resolved per-tenant settings: stored overrides overlaid on defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub tenant_id: String,
    pub notify_destination_id: Option<String>,
    pub poll_interval_secs: u64,
    pub message_spacing_ms: u64,
}

impl EffectiveConfig {
    /// Overlay stored overrides on process defaults, field by field.
    pub fn resolve(
        tenant_id: &str,
        overrides: Option<&TenantOverrides>,
        defaults: &ConfigDefaults,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            notify_destination_id: overrides
                .and_then(|o| o.notify_destination_id.clone())
                .or_else(|| defaults.notify_destination_id.clone()),
            poll_interval_secs: overrides
                .and_then(|o| o.poll_interval_secs)
                .map(|s| s.max(0) as u64)
                .unwrap_or(defaults.poll_interval_secs),
            message_spacing_ms: overrides
                .and_then(|o| o.message_spacing_ms)
                .map(|ms| ms.max(0) as u64)
                .unwrap_or(defaults.message_spacing_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn message_spacing(&self) -> Duration {
        Duration::from_millis(self.message_spacing_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(
        destination: Option<&str>,
        interval: Option<i64>,
        spacing: Option<i64>,
    ) -> TenantOverrides {
        TenantOverrides {
            tenant_id: "tenant-1".to_string(),
            notify_destination_id: destination.map(String::from),
            poll_interval_secs: interval,
            message_spacing_ms: spacing,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_effective_config_all_defaults() {
        let defaults = ConfigDefaults {
            notify_destination_id: Some("chan-default".to_string()),
            ..Default::default()
        };
        let cfg = EffectiveConfig::resolve("tenant-1", None, &defaults);
        assert_eq!(cfg.notify_destination_id.as_deref(), Some("chan-default"));
        assert_eq!(cfg.poll_interval_secs, 30);
        assert_eq!(cfg.message_spacing_ms, 1500);
    }

    #[test]
    fn test_effective_config_field_by_field_overlay() {
        let defaults = ConfigDefaults {
            notify_destination_id: Some("chan-default".to_string()),
            ..Default::default()
        };
        // Only the interval is overridden; destination and spacing fall back
        let o = overrides(None, Some(60), None);
        let cfg = EffectiveConfig::resolve("tenant-1", Some(&o), &defaults);
        assert_eq!(cfg.notify_destination_id.as_deref(), Some("chan-default"));
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.message_spacing_ms, 1500);
    }

    #[test]
    fn test_effective_config_full_override() {
        let defaults = ConfigDefaults::default();
        let o = overrides(Some("chan-42"), Some(120), Some(250));
        let cfg = EffectiveConfig::resolve("tenant-1", Some(&o), &defaults);
        assert_eq!(cfg.notify_destination_id.as_deref(), Some("chan-42"));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(120));
        assert_eq!(cfg.message_spacing(), Duration::from_millis(250));
    }

    #[test]
    fn test_effective_config_negative_values_clamped() {
        let defaults = ConfigDefaults::default();
        let o = overrides(None, Some(-10), Some(-5));
        let cfg = EffectiveConfig::resolve("tenant-1", Some(&o), &defaults);
        assert_eq!(cfg.poll_interval_secs, 0);
        assert_eq!(cfg.message_spacing_ms, 0);
    }

    #[test]
    fn test_delivery_is_pending() {
        let mut d = Delivery {
            id: Uuid::new_v4(),
            notification_id: Uuid::new_v4(),
            username: "alice".to_string(),
            delivered_at: None,
            delivered_message_id: None,
            attempts: 0,
            last_attempt_at: None,
            error: None,
            claimed_at: None,
            created_at: Utc::now(),
        };
        assert!(d.is_pending());
        d.claimed_at = Some(Utc::now());
        assert!(!d.is_pending());
        d.claimed_at = None;
        d.delivered_at = Some(Utc::now());
        assert!(!d.is_pending());
    }
}
