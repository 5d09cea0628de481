//! # tessera-data
//!
//! Data source plugins for the Tessera data plane.
//!
//! A data plugin periodically pulls a snapshot from an external system and
//! replaces the subtree of the document store that it owns. The
//! orchestrator keeps the set of running plugins in line with the
//! configuration and enforces that no one else writes to a plugin's path.
//!
//! ## Key components
//!
//! - [`Registry`] / [`SourceFactory`] / [`Source`] — source kinds selected
//!   by the `type` field, with built-in `file` and `http` kinds.
//! - [`validate`] — turns raw configuration into a [`Config`], rejecting
//!   overlapping paths and unknown kinds.
//! - [`DataPlugins`] — the orchestrator: start, stop, reconfigure, and the
//!   commit trigger that watches for bundle overlaps.
//! - [`DataPlugin`] — one instance and its poll loop.
//! - [`TransformEngine`] — the hook through which fetched batches are
//!   reshaped by a policy rule before they are stored.
//! - [`StatusRegistry`] — component health reported to operators.

pub mod config;
pub mod duration;
pub mod error;
pub mod orchestrator;
pub mod plugin;
pub mod registry;
pub mod sources;
pub mod status;
pub mod transform;

pub use config::{validate, Config, Entry};
pub use duration::{duration_from_value, parse_duration};
pub use error::DataError;
pub use orchestrator::{DataPlugins, COMPONENT, DEFAULT_STOP_TIMEOUT};
pub use plugin::{DataPlugin, PluginContext, PluginState, PostCommitHook};
pub use registry::{Registry, Source, SourceConfig, SourceFactory};
pub use status::{ComponentStatus, Status, StatusRegistry};
pub use transform::{FnTransformEngine, NoTransformEngine, RuleRef, Transform, TransformEngine};
