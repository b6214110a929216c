//! Transaction guard for automatic rollback on drop
//!
//! A [`Transaction`] is the manual form of a unit of work: it derefs to a
//! [`Session`] bound to the transaction, and must be finished with
//! [`Transaction::commit`] or [`Transaction::rollback`]. Dropping an
//! unfinished guard rolls the transaction back.
//!
//! Beginning a transaction on a session that is already inside one returns
//! a participating guard: it runs on the enclosing transaction, its commit
//! is a no-op and its rollback aborts the enclosing transaction.

use super::database::TransactionPermit;
use super::error::{DatabaseError, Result};
use super::session::Session;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

/// Lifecycle of a transaction; `Committed` and `RolledBack` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Committed,
    RolledBack,
}

/// Shared state of one database-level transaction
///
/// Holds the backend's transaction gate until the transaction has ended.
pub(crate) struct TxState {
    status: Mutex<TransactionStatus>,
    permit: Mutex<Option<TransactionPermit>>,
}

impl std::fmt::Debug for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxState")
            .field("status", &self.status())
            .finish()
    }
}

impl TxState {
    pub(crate) fn new(permit: TransactionPermit) -> Self {
        Self {
            status: Mutex::new(TransactionStatus::Open),
            permit: Mutex::new(Some(permit)),
        }
    }

    /// Give up the transaction gate
    pub(crate) fn release(&self) -> Option<TransactionPermit> {
        self.permit.lock().take()
    }

    pub(crate) fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Error unless the transaction is still open
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.status() {
            TransactionStatus::Open => Ok(()),
            TransactionStatus::Committed => {
                Err(DatabaseError::aborted("transaction is already committed"))
            }
            TransactionStatus::RolledBack => {
                Err(DatabaseError::aborted("transaction has been rolled back"))
            }
        }
    }

    /// Move an open transaction to `next`; returns false when it was not open
    pub(crate) fn finish(&self, next: TransactionStatus) -> bool {
        let mut status = self.status.lock();
        if *status != TransactionStatus::Open {
            return false;
        }
        *status = next;
        true
    }
}

/// Transaction guard that automatically rolls back on drop if not finished
///
/// # Example
///
/// ```ignore
/// let tx = session.begin().await?;
/// tx.create(&mut user_17).await?;
/// tx.create(&mut user_18).await?;
/// tx.commit().await?;
/// ```
pub struct Transaction {
    session: Session,
    state: Arc<TxState>,
    owner: bool,
}

impl Transaction {
    /// Guard owning a freshly begun database transaction
    pub(crate) fn owner(session: Session, state: Arc<TxState>) -> Self {
        Self {
            session,
            state,
            owner: true,
        }
    }

    /// Guard participating in an enclosing transaction
    pub(crate) fn participant(session: Session, state: Arc<TxState>) -> Self {
        Self {
            session,
            state,
            owner: false,
        }
    }

    /// Session bound to this transaction
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.state.status()
    }

    /// True when this guard runs on an enclosing transaction
    pub fn is_nested(&self) -> bool {
        !self.owner
    }

    /// Commit the transaction
    ///
    /// Fails with `TransactionAborted` when a statement inside it failed or
    /// it was already finished. For a participating guard this only checks
    /// that the enclosing transaction is still open.
    pub async fn commit(self) -> Result<()> {
        self.state.ensure_open()?;
        if !self.owner {
            return Ok(());
        }

        let result = match self.session.database().commit().await {
            Ok(()) => {
                self.state.finish(TransactionStatus::Committed);
                tracing::debug!("transaction committed");
                Ok(())
            }
            Err(e) => {
                self.state.finish(TransactionStatus::RolledBack);
                if let Err(rollback) = self.session.database().rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed commit did not complete");
                }
                tracing::debug!(error = %e, "transaction commit failed, rolled back");
                Err(e)
            }
        };
        drop(self.state.release());
        result
    }

    /// Explicitly roll back the transaction
    ///
    /// Rolling back a transaction that was already rolled back (for example
    /// after a failed statement) is a no-op. A participating guard rolls
    /// back the enclosing transaction.
    pub async fn rollback(self) -> Result<()> {
        match self.state.status() {
            TransactionStatus::RolledBack => Ok(()),
            TransactionStatus::Committed => {
                Err(DatabaseError::aborted("transaction is already committed"))
            }
            TransactionStatus::Open => {
                self.session.abort_transaction("rollback requested").await;
                Ok(())
            }
        }
    }
}

impl Deref for Transaction {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.owner && self.state.finish(TransactionStatus::RolledBack) {
            self.session
                .database()
                .discard_transaction(self.state.release());
            tracing::warn!("transaction dropped without commit or rollback; rolled back");
        }
    }
}
