// transaction.rs — Transaction handles.
//
// A Transaction owns the lock it was admitted under:
//   - read:  an owned shared guard on the tree, held until commit/abort
//   - write: an owned guard on the single writer mutex, held until
//            commit/abort, plus a staged copy of the tree (created on the
//            first write) and the list of changes made so far
//
// `Store::commit` and `Store::abort` take the handle by value, so a
// transaction cannot be used after it has finished.

use std::fmt;

use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard};

use crate::store::State;
use crate::trigger::TriggerEvent;

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionParams {
    pub write: bool,
}

impl TransactionParams {
    pub fn read() -> Self {
        Self { write: false }
    }

    pub fn write() -> Self {
        Self { write: true }
    }
}

/// A handle bound to exactly one store.
pub struct Transaction {
    pub(crate) id: u64,
    pub(crate) store_id: u64,
    pub(crate) mode: Mode,
}

pub(crate) enum Mode {
    Read(OwnedRwLockReadGuard<State>),
    Write(WriteState),
}

pub(crate) struct WriteState {
    /// Held for the lifetime of the transaction; released last on commit.
    pub(crate) writer: OwnedMutexGuard<()>,
    /// Copy-on-first-write snapshot of the tree with this transaction's
    /// changes applied. `None` until something is written.
    pub(crate) staged: Option<State>,
    /// Changes in write order, handed to triggers on commit.
    pub(crate) event: TriggerEvent,
}

impl Transaction {
    /// Monotonically increasing per store.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_write(&self) -> bool {
        matches!(self.mode, Mode::Write(_))
    }

    /// True when a write transaction has buffered at least one change.
    pub fn has_changes(&self) -> bool {
        match &self.mode {
            Mode::Read(_) => false,
            Mode::Write(w) => !w.event.is_empty(),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("store_id", &self.store_id)
            .field("write", &self.is_write())
            .field("has_changes", &self.has_changes())
            .finish()
    }
}
