//! replicant-cluster — the workload registry as seen by the autoscaler.
//!
//! [`ClusterApi`] is the only way the sampler and scaler touch the cluster:
//! list instances, read their usage, list workloads, update replica counts.
//! [`with_timeout`] bounds each call so a hung registry cannot stall a tick.
//!
//! [`InMemoryCluster`] implements the trait in process for tests; the
//! Kubernetes implementation lives in `replicant-kube`.

pub mod api;
pub mod memory;

pub use api::{with_timeout, ClusterApi, ClusterFuture};
pub use memory::{InMemoryCluster, UpdateCall};
