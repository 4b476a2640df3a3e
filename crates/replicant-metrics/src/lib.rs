//! replicant-metrics — per-instance utilization sampling.
//!
//! Relates each running instance's current CPU and memory consumption to
//! the limits it declares, producing one `UtilizationSample` per instance
//! per tick.
//!
//! # Architecture
//!
//! ```text
//! UtilizationSampler
//!   ├── list_instances()          ← one call per tick
//!   ├── DeclaredLimits::of()      ← every instance, before any read
//!   ├── read_usage() × N          ← bounded concurrency, each with a timeout
//!   └── utilization()             → UtilizationSample (percent of limit)
//! ```
//!
//! An instance without a CPU or memory limit, or whose usage cannot be
//! read, fails the whole tick. Instances that are not running are skipped.

pub mod sampler;

pub use sampler::{utilization, DeclaredLimits, UtilizationSampler};
