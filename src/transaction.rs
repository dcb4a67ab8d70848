//! Transaction state machine.
//!
//! ```text
//! Idle --begin--> Active --commit/rollback--> Idle
//! ```
//!
//! At most one transaction is active per database; a second `begin` is
//! refused rather than queued. The thread that opened a transaction owns it:
//! only that thread may commit or roll it back.

use crate::error::{Error, Result};
use std::thread::ThreadId;

/// Identifier handed out by [`TxnState::begin`].
pub type TxnId = u64;

/// Whether an explicit transaction is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnStatus {
    /// No explicit transaction; mutations may auto-commit.
    #[default]
    Idle,
    /// An explicit transaction is open.
    Active {
        /// Transaction id
        id: TxnId,
        /// Thread that opened it
        owner: ThreadId,
    },
}

/// Transaction bookkeeping of one database.
#[derive(Debug, Default)]
pub struct TxnState {
    status: TxnStatus,
    next_id: TxnId,
}

impl TxnState {
    /// Starts in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Whether an explicit transaction is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.status, TxnStatus::Active { .. })
    }

    /// Thread owning the open transaction, if any.
    #[must_use]
    pub fn owner(&self) -> Option<ThreadId> {
        match self.status {
            TxnStatus::Active { owner, .. } => Some(owner),
            TxnStatus::Idle => None,
        }
    }

    /// Whether a transaction owned by a thread other than `thread` is open.
    #[must_use]
    pub fn is_foreign_to(&self, thread: ThreadId) -> bool {
        self.owner().is_some_and(|owner| owner != thread)
    }

    /// Moves to `Active`, owned by `owner`.
    pub fn begin(&mut self, owner: ThreadId) -> Result<TxnId> {
        if let TxnStatus::Active { id, .. } = self.status {
            return Err(Error::lock_error(format!("transaction {} is already active", id)));
        }
        self.next_id += 1;
        self.status = TxnStatus::Active { id: self.next_id, owner };
        Ok(self.next_id)
    }

    /// Moves back to `Idle` on behalf of `caller`, returning the id of the
    /// finished transaction.
    pub fn finish(&mut self, caller: ThreadId) -> Result<TxnId> {
        match self.status {
            TxnStatus::Active { id, owner } if owner == caller => {
                self.status = TxnStatus::Idle;
                Ok(id)
            }
            TxnStatus::Active { id, .. } => Err(Error::lock_error(format!(
                "transaction {} belongs to another thread",
                id
            ))),
            TxnStatus::Idle => Err(Error::lock_error("no active transaction")),
        }
    }

    /// Moves back to `Idle` whoever owns the transaction. Used when the
    /// database itself goes away.
    pub fn abandon(&mut self) -> Option<TxnId> {
        match std::mem::take(&mut self.status) {
            TxnStatus::Active { id, .. } => Some(id),
            TxnStatus::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_begin_finish_cycle() {
        let me = thread::current().id();
        let mut txn = TxnState::new();
        assert_eq!(txn.status(), TxnStatus::Idle);

        let first = txn.begin(me).unwrap();
        assert!(txn.is_active());
        assert_eq!(txn.owner(), Some(me));
        assert_eq!(txn.finish(me).unwrap(), first);
        assert!(!txn.is_active());

        let second = txn.begin(me).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_protocol_violations() {
        let me = thread::current().id();
        let mut txn = TxnState::new();
        assert!(matches!(txn.finish(me), Err(Error::LockError(_))));

        txn.begin(me).unwrap();
        assert!(matches!(txn.begin(me), Err(Error::LockError(_))));
        // The refused begin leaves the open transaction alone.
        assert!(txn.is_active());
    }

    #[test]
    fn test_only_owner_finishes() {
        let me = thread::current().id();
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        let mut txn = TxnState::new();

        let id = txn.begin(me).unwrap();
        assert!(txn.is_foreign_to(other));
        assert!(!txn.is_foreign_to(me));
        assert!(matches!(txn.finish(other), Err(Error::LockError(_))));
        assert!(txn.is_active());

        assert_eq!(txn.abandon(), Some(id));
        assert_eq!(txn.abandon(), None);
        assert!(!txn.is_foreign_to(other));
    }
}
