//! Delivery sender — one tenant pass: claim pending deliveries, batch them by
//! recipient, render, send, and record the outcome.
//!
//! All failures here are batch-scoped: an unlinked recipient or a failed send
//! affects only that recipient's batch, which returns to pending for the next
//! pass. Retries are unbounded; `attempts` and `error` are always recorded
//! verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use herald_common::types::{Delivery, EffectiveConfig, Notification};
use herald_store::{DeliveryStore, IdentityResolver};

use crate::format;
use crate::messenger::Messenger;

/// Outcome counts for one tenant pass, for structured logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Deliveries claimed at the start of the pass.
    pub claimed: usize,
    /// Distinct recipients the claimed batch grouped into.
    pub recipients: usize,
    /// Deliveries marked delivered.
    pub delivered: usize,
    /// Deliveries marked failed (unlinked recipient or send failure).
    pub failed: usize,
    /// Deliveries released without an attempt (empty batch after filtering).
    pub released: usize,
}

/// Runs delivery passes against a store and a messaging capability.
pub struct DeliveryEngine<S, M> {
    store: Arc<S>,
    messenger: Arc<M>,
    batch_limit: i64,
}

impl<S, M> DeliveryEngine<S, M>
where
    S: DeliveryStore + IdentityResolver,
    M: Messenger,
{
    pub fn new(store: Arc<S>, messenger: Arc<M>, batch_limit: i64) -> Self {
        Self {
            store,
            messenger,
            batch_limit,
        }
    }

    /// Run one delivery pass for a tenant.
    ///
    /// Skips the whole tenant when no destination is configured or the
    /// destination is not sendable — both resolve on a later config change,
    /// so no retry bookkeeping is recorded for them.
    pub async fn process_tenant(&self, cfg: &EffectiveConfig) -> anyhow::Result<PassSummary> {
        let mut summary = PassSummary::default();

        let Some(destination) = cfg.notify_destination_id.as_deref() else {
            tracing::warn!(tenant = %cfg.tenant_id, "No notify destination configured, skipping");
            return Ok(summary);
        };

        match self.messenger.destination_sendable(destination).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    tenant = %cfg.tenant_id,
                    destination = %destination,
                    "Notify destination not found or not text-capable, skipping"
                );
                return Ok(summary);
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %cfg.tenant_id,
                    destination = %destination,
                    error = %e,
                    "Could not resolve notify destination, skipping"
                );
                return Ok(summary);
            }
        }

        // Snapshot read, then claim each id individually; losing a claim race
        // to another instance just drops the id from this pass.
        let pending = self.store.fetch_pending_batch(self.batch_limit).await?;
        if pending.is_empty() {
            return Ok(summary);
        }

        let mut claimed = Vec::new();
        for id in pending {
            if let Some(delivery) = self.store.try_claim(id).await? {
                claimed.push(delivery);
            }
        }
        summary.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(summary);
        }

        let groups = format::group_by_recipient(claimed);
        summary.recipients = groups.len();
        let total = groups.len();

        for (index, (username, batch)) in groups.into_iter().enumerate() {
            self.process_recipient(cfg, destination, &username, batch, &mut summary)
                .await?;

            // Backpressure against platform rate limits; skipped after the
            // last recipient.
            if index + 1 < total {
                tokio::time::sleep(cfg.message_spacing()).await;
            }
        }

        Ok(summary)
    }

    /// Deliver one recipient's claimed batch as a single message.
    async fn process_recipient(
        &self,
        cfg: &EffectiveConfig,
        destination: &str,
        username: &str,
        batch: Vec<Delivery>,
        summary: &mut PassSummary,
    ) -> anyhow::Result<()> {
        let ids: Vec<Uuid> = batch.iter().map(|d| d.id).collect();

        let Some(external_id) = self.store.resolve(username).await? else {
            tracing::warn!(
                tenant = %cfg.tenant_id,
                username = %username,
                "No linked identity for recipient, batch returns to pending"
            );
            self.store.mark_failed(&ids, "no linked identity").await?;
            summary.failed += ids.len();
            return Ok(());
        };

        let notification_ids: Vec<Uuid> = batch.iter().map(|d| d.notification_id).collect();
        let notifications: HashMap<Uuid, Notification> = self
            .store
            .load_notifications(&notification_ids)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let lines = format::render_lines(&batch, &notifications);
        if lines.is_empty() {
            // Nothing renderable; release without recording an attempt.
            self.store.release_claim(&ids).await?;
            summary.released += ids.len();
            return Ok(());
        }

        let content = format::compose(&self.messenger.mention(&external_id), &lines);
        match self.messenger.send(destination, &content).await {
            Ok(message_id) => {
                // Truncated-away lines are still part of this batch and get
                // the same message id.
                self.store.mark_delivered(&ids, &message_id).await?;
                summary.delivered += ids.len();
                tracing::debug!(
                    tenant = %cfg.tenant_id,
                    username = %username,
                    message_id = %message_id,
                    count = ids.len(),
                    "Batch delivered"
                );
            }
            Err(e) => {
                tracing::error!(
                    tenant = %cfg.tenant_id,
                    username = %username,
                    error = %e,
                    "Send failed, batch returns to pending"
                );
                self.store.mark_failed(&ids, &e.to_string()).await?;
                summary.failed += ids.len();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use herald_common::types::ConfigDefaults;
    use herald_store::memory::MemoryStore;

    use crate::messenger::SendError;

    /// Messenger that records sends with timestamps, optionally failing.
    #[derive(Default)]
    struct TestMessenger {
        sends: Mutex<Vec<(String, String, Instant)>>,
        fail_with: Option<String>,
        unsendable: bool,
    }

    #[async_trait]
    impl Messenger for TestMessenger {
        async fn destination_sendable(&self, _destination_id: &str) -> Result<bool, SendError> {
            Ok(!self.unsendable)
        }

        async fn send(&self, destination_id: &str, content: &str) -> Result<String, SendError> {
            if let Some(cause) = &self.fail_with {
                return Err(SendError::Transport(cause.clone()));
            }
            let mut sends = self.sends.lock().unwrap();
            sends.push((
                destination_id.to_string(),
                content.to_string(),
                Instant::now(),
            ));
            Ok(format!("m-{}", sends.len()))
        }
    }

    fn config(spacing_ms: u64) -> EffectiveConfig {
        EffectiveConfig {
            tenant_id: "tenant-1".to_string(),
            notify_destination_id: Some("chan-1".to_string()),
            poll_interval_secs: 30,
            message_spacing_ms: spacing_ms,
        }
    }

    fn engine(
        store: &MemoryStore,
        messenger: TestMessenger,
    ) -> (DeliveryEngine<MemoryStore, TestMessenger>, Arc<TestMessenger>) {
        let messenger = Arc::new(messenger);
        (
            DeliveryEngine::new(Arc::new(store.clone()), messenger.clone(), 500),
            messenger,
        )
    }

    #[tokio::test]
    async fn test_one_recipient_batch_is_one_message() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("Build", "passed").await;
        let ids = [
            store.add_delivery(n, "alice").await,
            store.add_delivery(n, "alice").await,
            store.add_delivery(n, "alice").await,
        ];
        store.link("alice", "9001").await;

        let (engine, messenger) = engine(&store, TestMessenger::default());
        let summary = engine.process_tenant(&config(0)).await.unwrap();

        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.recipients, 1);
        assert_eq!(summary.delivered, 3);
        assert_eq!(messenger.sends.lock().unwrap().len(), 1);

        for id in ids {
            let d = store.delivery(id).await.unwrap();
            assert!(d.delivered_at.is_some());
            assert_eq!(d.delivered_message_id.as_deref(), Some("m-1"));
            assert!(d.claimed_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_message_contains_mention_and_lines() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("Deploy done", "v2 live").await;
        store.add_delivery(n, "alice").await;
        store.link("alice", "9001").await;

        let (engine, messenger) = engine(&store, TestMessenger::default());
        engine.process_tenant(&config(0)).await.unwrap();

        let sends = messenger.sends.lock().unwrap();
        let (dest, content, _) = &sends[0];
        assert_eq!(dest, "chan-1");
        assert_eq!(content, "<@9001>\n• [Deploy done] — v2 live");
    }

    #[tokio::test]
    async fn test_unlinked_recipient_batch_returns_to_pending() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("t", "s").await;
        let id = store.add_delivery(n, "ghost").await;

        let (engine, messenger) = engine(&store, TestMessenger::default());
        let summary = engine.process_tenant(&config(0)).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(messenger.sends.lock().unwrap().is_empty());

        let d = store.delivery(id).await.unwrap();
        assert_eq!(d.attempts, 1);
        assert_eq!(d.error.as_deref(), Some("no linked identity"));
        assert!(d.claimed_at.is_none());
        assert!(d.delivered_at.is_none());
        // Eligible again on the next pass
        assert_eq!(store.fetch_pending_batch(10).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_send_failure_records_error_verbatim() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("t", "s").await;
        let id = store.add_delivery(n, "alice").await;
        store.link("alice", "9001").await;

        let messenger = TestMessenger {
            fail_with: Some("network timeout".to_string()),
            ..Default::default()
        };
        let (engine, _) = engine(&store, messenger);
        let summary = engine.process_tenant(&config(0)).await.unwrap();

        assert_eq!(summary.failed, 1);
        let d = store.delivery(id).await.unwrap();
        assert_eq!(d.attempts, 1);
        assert_eq!(d.error.as_deref(), Some("network timeout"));
        assert!(d.claimed_at.is_none());
        assert!(d.delivered_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_content_releases_without_attempt() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("t", "s").await;
        let id = store.add_delivery(n, "alice").await;
        store.link("alice", "9001").await;
        // Point the delivery at content that does not exist
        let orphan = store.add_delivery(Uuid::new_v4(), "bob").await;
        store.link("bob", "9002").await;

        let (engine, messenger) = engine(&store, TestMessenger::default());
        let summary = engine.process_tenant(&config(0)).await.unwrap();

        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.released, 1);
        assert_eq!(messenger.sends.lock().unwrap().len(), 1);

        let d = store.delivery(orphan).await.unwrap();
        assert_eq!(d.attempts, 0);
        assert!(d.claimed_at.is_none());
        assert!(d.delivered_at.is_none());
        let delivered = store.delivery(id).await.unwrap();
        assert!(delivered.delivered_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_recipients() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("t", "s").await;
        store.add_delivery(n, "alice").await;
        store.add_delivery(n, "bob").await;
        store.link("alice", "9001").await;
        store.link("bob", "9002").await;

        let (engine, messenger) = engine(&store, TestMessenger::default());
        let summary = engine.process_tenant(&config(1000)).await.unwrap();

        assert_eq!(summary.recipients, 2);
        assert_eq!(summary.delivered, 2);

        let sends = messenger.sends.lock().unwrap();
        assert_eq!(sends.len(), 2);
        let gap = sends[1].2.duration_since(sends[0].2);
        assert!(gap >= std::time::Duration::from_millis(1000), "gap was {gap:?}");
    }

    #[tokio::test]
    async fn test_no_destination_skips_without_claiming() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("t", "s").await;
        let id = store.add_delivery(n, "alice").await;
        store.link("alice", "9001").await;

        let (engine, _) = engine(&store, TestMessenger::default());
        let cfg = EffectiveConfig {
            notify_destination_id: None,
            ..config(0)
        };
        let summary = engine.process_tenant(&cfg).await.unwrap();

        assert_eq!(summary, PassSummary::default());
        assert!(store.delivery(id).await.unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_unsendable_destination_skips_without_claiming() {
        let store = MemoryStore::new(ConfigDefaults::default());
        let n = store.add_notification("t", "s").await;
        let id = store.add_delivery(n, "alice").await;
        store.link("alice", "9001").await;

        let messenger = TestMessenger {
            unsendable: true,
            ..Default::default()
        };
        let (engine, _) = engine(&store, messenger);
        let summary = engine.process_tenant(&config(0)).await.unwrap();

        assert_eq!(summary, PassSummary::default());
        assert!(store.delivery(id).await.unwrap().is_pending());
    }
}
