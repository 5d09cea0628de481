//! # tessera-store
//!
//! Transactional in-memory document store for the Tessera data plane.
//!
//! Holds one JSON-like tree plus a set of policy texts. Any number of read
//! transactions may run at once; exactly one write transaction is admitted at
//! a time and its changes become visible atomically on commit. Registered
//! triggers run synchronously inside every committing write.
//!
//! ## Key components
//!
//! - [`Store`] — the store itself: transactions, reads, patches, policies,
//!   triggers, and the registry of paths claimed by data plugins.
//! - [`Path`] — segment-wise tree addresses in slash (`/a/b`) or dotted
//!   (`a.b`) form.
//! - [`Transaction`] — owns the locks it was admitted under; consumed by
//!   [`Store::commit`] / [`Store::abort`].
//! - [`Trigger`] / [`CommitView`] / [`TriggerEvent`] — post-commit callbacks.
//! - [`Update`] / [`TruncateParams`] — bulk replacement of subtrees, used to
//!   activate bundles.

pub mod error;
pub mod path;
pub mod store;
pub mod transaction;
pub mod tree;
pub mod trigger;
pub mod truncate;

pub use error::StoreError;
pub use path::Path;
pub use store::Store;
pub use transaction::{Transaction, TransactionParams};
pub use tree::PatchOp;
pub use trigger::{CommitView, DataEvent, PolicyEvent, Trigger, TriggerEvent, TriggerHandle};
pub use truncate::{TruncateParams, Update};
