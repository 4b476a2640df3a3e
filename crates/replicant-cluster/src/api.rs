//! The registry seam: everything the autoscaler asks of the cluster.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use replicant_core::{
    ContainerUsage, Instance, ReplicantError, ReplicantResult, ScalableTarget, WorkloadKind,
};

/// Boxed future returned by every [`ClusterApi`] call.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = ReplicantResult<T>> + Send + 'a>>;

/// Operations the autoscaler consumes from the workload registry.
///
/// Implementations report read failures as [`ReplicantError::Fetch`] and
/// update failures as [`ReplicantError::Update`]. Callers wrap each call in
/// [`with_timeout`].
pub trait ClusterApi: Send + Sync {
    /// List instances in `namespace` whose labels match `selector`.
    fn list_instances<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> ClusterFuture<'a, Vec<Instance>>;

    /// Read per-container usage for one instance.
    fn read_usage<'a>(
        &'a self,
        namespace: &'a str,
        instance: &'a str,
    ) -> ClusterFuture<'a, Vec<ContainerUsage>>;

    /// List workloads of one kind matching `selector`.
    fn list_workloads<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
        kind: WorkloadKind,
    ) -> ClusterFuture<'a, Vec<ScalableTarget>>;

    /// Set the desired replica count of one workload.
    fn update_replicas<'a>(
        &'a self,
        namespace: &'a str,
        kind: WorkloadKind,
        name: &'a str,
        replicas: u32,
    ) -> ClusterFuture<'a, ()>;
}

/// Run a registry call with an upper bound on its duration.
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> ReplicantResult<T>
where
    F: Future<Output = ReplicantResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ReplicantError::Timeout {
            operation,
            after: limit,
        }),
    }
}
