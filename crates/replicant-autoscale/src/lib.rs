//! replicant-autoscale — utilization-driven replica scaling.
//!
//! Samples per-instance utilization, aggregates it into one decision per
//! tick, and applies that decision to every workload matching the selector.
//!
//! # Scaling Algorithm
//!
//! ```text
//! count  = number of sampled instances
//! cpu    = mean cpu ratio (percent of limit)
//! memory = mean memory ratio (percent of limit)
//!
//! if cpu >= up or memory >= up:
//!     ScaleTo(clamp(count + 1, min, max))
//!
//! if cpu <= down and memory <= down:
//!     ScaleTo(clamp(count - 1, min, max))
//!
//! otherwise Hold
//! ```
//!
//! The step is always one replica. Nothing is remembered between ticks:
//! every tick re-lists instances and workloads, so out-of-band changes are
//! corrected on the next period.

pub mod decision;
pub mod reconciler;

pub use decision::DecisionEngine;
pub use reconciler::{run, Reconciler, TickError, TickOutcome, TickPhase};
