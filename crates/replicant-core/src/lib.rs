//! replicant-core — shared types for the replicant autoscaler.
//!
//! Holds the per-tick data model (instances, samples, decisions, targets),
//! the immutable scaling policy, label selectors, the `replicant.toml`
//! parser and the error taxonomy every other crate reports through.

pub mod config;
pub mod error;
pub mod selector;
pub mod types;

pub use config::{ReplicantConfig, Settings};
pub use error::{ApplyFailure, ErrorClass, ReplicantError, ReplicantResult};
pub use selector::LabelSelector;
pub use types::*;
