//! Ambient transaction handle shared by engine operations.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use gamevault_core::Effect;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::{Store, StoreTx};

/// A store plus the signal used to wake the outbox dispatcher.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn Store>,
    outbox_signal: Arc<Notify>,
}

impl Database {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            outbox_signal: Arc::new(Notify::new()),
        }
    }

    /// The underlying store, for committed reads.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Notified after every commit that published effects.
    #[must_use]
    pub fn outbox_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.outbox_signal)
    }

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    pub async fn begin(&self) -> Result<TxContext> {
        let tx = self.store.begin().await?;
        Ok(TxContext {
            tx,
            signal: Arc::clone(&self.outbox_signal),
            published: 0,
        })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// An open transaction threaded through engine calls.
///
/// Operations accept `Option<&mut TxContext>`: with `Some`, they join the caller's
/// transaction and the caller decides commit or rollback; with `None`, they open
/// and finish their own.
pub struct TxContext {
    tx: Box<dyn StoreTx>,
    signal: Arc<Notify>,
    published: usize,
}

impl TxContext {
    /// Record an effect for delivery once this transaction commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbox write fails.
    pub async fn publish(&mut self, effect: Effect) -> Result<()> {
        self.tx.enqueue_effect(&effect).await?;
        self.published += 1;
        Ok(())
    }

    /// Effects published so far.
    #[must_use]
    pub const fn published(&self) -> usize {
        self.published
    }

    /// Commit and wake the outbox dispatcher if anything was published.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing was written in that case.
    pub async fn commit(self) -> Result<()> {
        let Self {
            tx,
            signal,
            published,
        } = self;
        tx.commit().await?;
        if published > 0 {
            signal.notify_one();
        }
        Ok(())
    }

    /// Discard every write, including published effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await
    }

    /// Commit on `Ok`, roll back on `Err`.
    ///
    /// A failed rollback is logged and the original error returned.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or the commit error.
    pub async fn finish<T, E>(self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError> + fmt::Display,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back transaction");
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl Deref for TxContext {
    type Target = dyn StoreTx;

    fn deref(&self) -> &Self::Target {
        self.tx.as_ref()
    }
}

impl DerefMut for TxContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx.as_mut()
    }
}

impl fmt::Debug for TxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxContext")
            .field("published", &self.published)
            .finish_non_exhaustive()
    }
}
