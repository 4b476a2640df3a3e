//! Pushes one replica count to every matching workload.
//!
//! Workload kinds are processed in configured order. A workload that cannot
//! be updated is recorded and the remaining workloads are still attempted;
//! the apply then fails with `PartialApply` naming every workload left
//! behind. A kind that cannot be listed stops the apply: the listing error
//! is returned as is when nothing had failed yet, and folded into
//! `PartialApply` otherwise. Successful updates are never rolled back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use replicant_cluster::{with_timeout, ClusterApi};
use replicant_core::{
    ApplyFailure, ReplicantError, ReplicantResult, ScalableTarget, WorkloadKind,
};

/// Workloads successfully set to `replicas` by one apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub replicas: u32,
    /// Targets as they were listed, before the update.
    pub updated: Vec<ScalableTarget>,
}

impl ApplyReport {
    /// Workloads whose replica count actually changed.
    pub fn changed(&self) -> impl Iterator<Item = &ScalableTarget> {
        self.updated
            .iter()
            .filter(move |t| t.current_replicas != self.replicas)
    }
}

/// Sets the replica count of every workload matching a selector.
pub struct WorkloadScaler {
    cluster: Arc<dyn ClusterApi>,
    kinds: Vec<WorkloadKind>,
    call_timeout: Duration,
}

impl WorkloadScaler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        kinds: Vec<WorkloadKind>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            kinds,
            call_timeout,
        }
    }

    /// Set every matching workload of every configured kind to `replicas`.
    ///
    /// The update is issued even when a workload already has `replicas`;
    /// the registry treats that as a no-op.
    pub async fn apply(
        &self,
        replicas: u32,
        namespace: &str,
        selector: &str,
    ) -> ReplicantResult<ApplyReport> {
        let mut report = ApplyReport {
            replicas,
            updated: Vec::new(),
        };
        let mut failures = Vec::new();

        for &kind in &self.kinds {
            let listed = with_timeout(
                "list workloads",
                self.call_timeout,
                self.cluster.list_workloads(namespace, selector, kind),
            )
            .await;
            let targets = match listed {
                Ok(targets) => targets,
                Err(e) if failures.is_empty() => return Err(e),
                Err(e) => {
                    warn!(%namespace, %kind, error = %e, "listing failed after earlier update failures");
                    return Err(ReplicantError::PartialApply {
                        failures,
                        aborted: Some(e.to_string()),
                    });
                }
            };

            debug!(%namespace, %kind, count = targets.len(), "listed workloads");

            for target in targets {
                match self.update(namespace, &target, replicas).await {
                    Ok(()) => report.updated.push(target),
                    Err(e) => {
                        warn!(
                            %namespace,
                            %kind,
                            workload = %target.name,
                            replicas,
                            error = %e,
                            "workload update failed"
                        );
                        failures.push(ApplyFailure {
                            kind,
                            name: target.name,
                            reason: failure_reason(e),
                        });
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(ReplicantError::PartialApply {
                failures,
                aborted: None,
            });
        }
        Ok(report)
    }

    async fn update(
        &self,
        namespace: &str,
        target: &ScalableTarget,
        replicas: u32,
    ) -> ReplicantResult<()> {
        with_timeout(
            "update replicas",
            self.call_timeout,
            self.cluster
                .update_replicas(namespace, target.kind, &target.name, replicas),
        )
        .await?;

        if target.current_replicas == replicas {
            debug!(kind = %target.kind, workload = %target.name, replicas, "workload already at target");
        } else {
            info!(
                kind = %target.kind,
                workload = %target.name,
                from = target.current_replicas,
                to = replicas,
                "scaled workload"
            );
        }
        Ok(())
    }
}

fn failure_reason(err: ReplicantError) -> String {
    match err {
        ReplicantError::Update { reason, .. } => reason,
        other => other.to_string(),
    }
}
