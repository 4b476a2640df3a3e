//! replicant-scheduler — applies scaling decisions to workloads.
//!
//! Takes the replica count chosen by the decision engine and writes it to
//! every scalable workload (deployments, replica sets, stateful sets) that
//! matches the autoscaled selector.
//!
//! # Architecture
//!
//! ```text
//! WorkloadScaler::apply(n)
//!   └── for each configured kind
//!       ├── list_workloads()     ← failure aborts the apply
//!       └── update_replicas(n)   ← failure recorded, others continue
//! ```

pub mod scaler;

pub use scaler::{ApplyReport, WorkloadScaler};
