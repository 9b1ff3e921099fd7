//! Delivery of committed effects to realtime clients.
//!
//! Effects are written to the outbox inside the transaction that caused them,
//! so only committed changes are ever delivered. The dispatcher drains the
//! outbox in order, at least once: a record is acked only after the notifier
//! accepted it. A pass stops at the first failure to keep per-channel order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gamevault_core::{Channel, Effect, Result};
use gamevault_store::Store;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Error type for effect delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The transport refused or dropped the message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The effect could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Pushes effects to connected clients.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `effect` to everyone subscribed to `channel`.
    async fn deliver(&self, channel: &Channel, effect: &Effect) -> std::result::Result<(), NotifyError>;
}

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records delivered and acked.
    pub delivered: usize,
    /// Delivery attempts that failed.
    pub failed: usize,
    /// Records dropped after too many attempts.
    pub dropped: usize,
}

/// Drains the outbox into a [`Notifier`].
pub struct OutboxDispatcher {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    signal: Arc<Notify>,
    batch_size: usize,
    poll_interval: Duration,
    max_attempts: u32,
}

impl std::fmt::Debug for OutboxDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxDispatcher")
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl OutboxDispatcher {
    /// Dispatcher woken by `signal` or every `poll_interval`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        signal: Arc<Notify>,
        batch_size: usize,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            signal,
            batch_size: batch_size.max(1),
            poll_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Deliver pending effects until the outbox is empty or a delivery fails.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the outbox cannot be read or updated.
    pub async fn dispatch_pending(&self) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        loop {
            let batch = self.store.pending_effects(self.batch_size).await?;
            if batch.is_empty() {
                return Ok(stats);
            }
            let full = batch.len() == self.batch_size;

            for record in batch {
                let channel = record.effect.channel();
                match self.notifier.deliver(&channel, &record.effect).await {
                    Ok(()) => {
                        self.store.ack_effect(record.id).await?;
                        stats.delivered += 1;
                    }
                    Err(err) => {
                        stats.failed += 1;
                        let attempts = self.store.record_failed_delivery(record.id).await?;
                        if attempts >= self.max_attempts {
                            error!(
                                outbox_id = record.id,
                                effect = record.effect.name(),
                                attempts,
                                error = %err,
                                "dropping undeliverable effect"
                            );
                            self.store.ack_effect(record.id).await?;
                            stats.dropped += 1;
                            continue;
                        }
                        warn!(
                            outbox_id = record.id,
                            effect = record.effect.name(),
                            attempts,
                            error = %err,
                            "effect delivery failed, will retry"
                        );
                        return Ok(stats);
                    }
                }
            }

            if !full {
                return Ok(stats);
            }
        }
    }

    /// Run until the runtime shuts down, waking on commits and on the poll
    /// interval.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.dispatch_pending().await {
                    Ok(stats) if stats != DispatchStats::default() => {
                        debug!(
                            delivered = stats.delivered,
                            failed = stats.failed,
                            dropped = stats.dropped,
                            "outbox pass"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "outbox pass failed"),
                }
                tokio::select! {
                    () = self.signal.notified() => {}
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        })
    }
}
