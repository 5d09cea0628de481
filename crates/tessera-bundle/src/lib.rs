//! # tessera-bundle
//!
//! Static bundles of data and policy for the Tessera data plane.
//!
//! A bundle is a directory of data files and policy sources plus a manifest
//! that declares which subtrees ("roots") of the document tree it owns.
//! Activating a bundle replaces exactly those subtrees in the store.
//!
//! ## Key components
//!
//! - [`Bundle`] — a loaded bundle ([`Bundle::load_dir`]).
//! - [`Manifest`] — revision, roots, metadata.
//! - [`activate`] / [`deactivate`] — install or remove bundles in one write
//!   transaction.
//! - [`roots_in_view`] — discover active bundle roots from inside a commit
//!   trigger.

pub mod activate;
pub mod bundle;
pub mod error;
pub mod manifest;

pub use activate::{
    activate, bundle_roots, bundles_path, deactivate, manifest_path, roots_in_view, validate_set,
};
pub use bundle::Bundle;
pub use error::BundleError;
pub use manifest::Manifest;
