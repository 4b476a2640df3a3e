//! Reconciliation loop: sample, decide, apply, wait, repeat.
//!
//! Each tick walks `Idle → Sampling → Deciding → Applying → Idle`. An error
//! in any phase ends the tick early (later phases are skipped) and is
//! logged with the phase it came from; the loop itself never stops on a
//! tick error. Shutdown is only observed between ticks, so a tick that has
//! started applying always finishes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use replicant_cluster::ClusterApi;
use replicant_core::{
    AggregateUtilization, ErrorClass, LabelSelector, PolicyConfig, ReplicantConfig,
    ReplicantError, ReplicantResult, ScalableTarget, ScalingDecision, Settings,
};
use replicant_metrics::UtilizationSampler;
use replicant_scheduler::WorkloadScaler;

use crate::decision::DecisionEngine;

/// Where a tick is (or was when it failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    Idle,
    Sampling,
    Deciding,
    Applying,
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickPhase::Idle => "idle",
            TickPhase::Sampling => "sampling",
            TickPhase::Deciding => "deciding",
            TickPhase::Applying => "applying",
        };
        f.write_str(name)
    }
}

/// A tick that ended early.
#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct TickError {
    pub phase: TickPhase,
    #[source]
    pub source: ReplicantError,
}

impl TickError {
    fn at(phase: TickPhase) -> impl FnOnce(ReplicantError) -> Self {
        move |source| Self { phase, source }
    }
}

/// What a completed tick did.
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub aggregate: AggregateUtilization,
    pub decision: ScalingDecision,
    /// Workloads updated this tick, as listed before the update.
    pub updated: Vec<ScalableTarget>,
    pub dry_run: bool,
}

/// Drives sampler, decision engine and scaler on a fixed period.
pub struct Reconciler {
    namespace: String,
    selector: LabelSelector,
    sampler: UtilizationSampler,
    engine: DecisionEngine,
    scaler: WorkloadScaler,
    period: Duration,
    dry_run: bool,
}

impl Reconciler {
    /// Build a reconciler from validated settings.
    pub fn new(settings: &Settings, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            namespace: settings.namespace.clone(),
            selector: settings.selector.clone(),
            sampler: UtilizationSampler::new(cluster.clone(), settings.call_timeout)
                .with_concurrency(settings.sample_concurrency),
            engine: DecisionEngine::new(settings.policy.clone()),
            scaler: WorkloadScaler::new(cluster, settings.kinds.clone(), settings.call_timeout),
            period: settings.period,
            dry_run: settings.dry_run,
        }
    }

    /// Run one full tick.
    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        let namespace = self.namespace.as_str();
        let selector = self.selector.as_str();

        let samples = self
            .sampler
            .sample(namespace, selector)
            .await
            .map_err(TickError::at(TickPhase::Sampling))?;

        let (aggregate, decision) = self
            .engine
            .evaluate(&samples)
            .map_err(TickError::at(TickPhase::Deciding))?;

        info!(
            %namespace,
            %selector,
            instances = aggregate.sample_count,
            cpu_pct = aggregate.mean_cpu_ratio,
            memory_pct = aggregate.mean_memory_ratio,
            decision = ?decision,
            "scaling decision"
        );

        let updated = match decision {
            ScalingDecision::Hold => Vec::new(),
            ScalingDecision::ScaleTo(replicas) if self.dry_run => {
                info!(replicas, "dry run, not applying");
                Vec::new()
            }
            ScalingDecision::ScaleTo(replicas) => {
                let report = self
                    .scaler
                    .apply(replicas, namespace, selector)
                    .await
                    .map_err(TickError::at(TickPhase::Applying))?;

                for target in &report.updated {
                    if target.current_replicas != aggregate.sample_count {
                        debug!(
                            kind = %target.kind,
                            workload = %target.name,
                            replicas = target.current_replicas,
                            observed = aggregate.sample_count,
                            "workload replica count differs from observed instances"
                        );
                    }
                }
                info!(replicas, workloads = report.updated.len(), "applied scaling decision");
                report.updated
            }
        };

        Ok(TickOutcome {
            aggregate,
            decision,
            updated,
            dry_run: self.dry_run,
        })
    }

    /// Run ticks until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            namespace = %self.namespace,
            selector = %self.selector,
            period_secs = self.period.as_secs_f64(),
            dry_run = self.dry_run,
            "reconciler started"
        );

        let mut tick: u64 = 0;
        loop {
            if *shutdown.borrow() {
                info!("reconciler shutting down");
                break;
            }

            tick += 1;
            // A started tick is never interrupted.
            if let Err(e) = self.tick().await {
                report_failure(tick, &e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}

fn report_failure(tick: u64, e: &TickError) {
    match e.source.class() {
        ErrorClass::Transient => {
            warn!(tick, phase = %e.phase, error = %e.source, "tick aborted, retrying next period");
        }
        ErrorClass::PartialApply => {
            error!(
                tick,
                phase = %e.phase,
                failed = ?e.source.failed_workloads(),
                error = %e.source,
                "tick partially applied"
            );
        }
        ErrorClass::Fatal => {
            error!(tick, phase = %e.phase, error = %e.source, "tick failed");
        }
    }
}

/// Validate the inputs and run the reconciliation loop until shutdown.
///
/// Returns a `Config` error without entering the loop if the selector,
/// namespace, policy or period is invalid.
pub async fn run(
    cluster: Arc<dyn ClusterApi>,
    selector: &str,
    namespace: &str,
    policy: PolicyConfig,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> ReplicantResult<()> {
    let mut config = ReplicantConfig::default();
    config.target.selector = selector.to_string();
    config.target.namespace = namespace.to_string();
    config.policy = policy;

    let settings = config.validate_with_period(period)?;
    Reconciler::new(&settings, cluster).run(shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_cluster::InMemoryCluster;
    use replicant_core::{
        ContainerLimits, ContainerUsage, Instance, InstancePhase, WorkloadKind,
    };

    const NS: &str = "default";
    const WEB: &[(&str, &str)] = &[("app", "web")];

    fn settings(dry_run: bool) -> Settings {
        let mut config = ReplicantConfig::default();
        config.target.selector = "app=web".to_string();
        config.reconcile.period = "10ms".to_string();
        config.reconcile.call_timeout = "1s".to_string();
        config.reconcile.dry_run = dry_run;
        config.validate().unwrap()
    }

    async fn add_pod(cluster: &InMemoryCluster, name: &str, cpu_limit: Option<u64>, cpu: u64, mem: u64) {
        cluster
            .add_instance(
                NS,
                WEB,
                Instance {
                    name: name.to_string(),
                    phase: InstancePhase::Running,
                    containers: vec![ContainerLimits {
                        name: "app".to_string(),
                        cpu_millis: cpu_limit,
                        memory_bytes: Some(1000),
                    }],
                },
            )
            .await;
        cluster
            .set_usage(
                NS,
                name,
                vec![ContainerUsage {
                    cpu_millis: cpu,
                    memory_bytes: mem,
                }],
            )
            .await;
    }

    async fn hot_cluster() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        for i in 0..3 {
            add_pod(&cluster, &format!("web-{i}"), Some(1000), 850, 400).await;
        }
        cluster.add_workload(NS, WEB, WorkloadKind::Deployment, "web", 3).await;
        cluster
    }

    #[tokio::test]
    async fn tick_scales_up_hot_group() {
        let cluster = hot_cluster().await;
        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));

        let outcome = reconciler.tick().await.unwrap();

        assert_eq!(outcome.decision, ScalingDecision::ScaleTo(4));
        assert_eq!(outcome.aggregate.sample_count, 3);
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(cluster.replicas(NS, WorkloadKind::Deployment, "web").await, Some(4));
    }

    #[tokio::test]
    async fn hold_does_not_touch_workloads() {
        let cluster = InMemoryCluster::new();
        add_pod(&cluster, "web-0", Some(1000), 500, 500).await;
        cluster.add_workload(NS, WEB, WorkloadKind::Deployment, "web", 1).await;
        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));

        let outcome = reconciler.tick().await.unwrap();

        assert_eq!(outcome.decision, ScalingDecision::Hold);
        assert!(cluster.updates().await.is_empty());
    }

    #[tokio::test]
    async fn dry_run_decides_without_applying() {
        let cluster = hot_cluster().await;
        let reconciler = Reconciler::new(&settings(true), Arc::new(cluster.clone()));

        let outcome = reconciler.tick().await.unwrap();

        assert_eq!(outcome.decision, ScalingDecision::ScaleTo(4));
        assert!(outcome.dry_run);
        assert!(cluster.updates().await.is_empty());
    }

    #[tokio::test]
    async fn missing_limit_fails_in_sampling_and_skips_apply() {
        let cluster = hot_cluster().await;
        add_pod(&cluster, "web-9", None, 100, 100).await;
        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));

        let err = reconciler.tick().await.unwrap_err();

        assert_eq!(err.phase, TickPhase::Sampling);
        assert!(matches!(err.source, ReplicantError::MissingLimit { .. }));
        assert!(cluster.updates().await.is_empty());
    }

    #[tokio::test]
    async fn no_instances_fails_in_deciding() {
        let cluster = InMemoryCluster::new();
        cluster.add_workload(NS, WEB, WorkloadKind::Deployment, "web", 3).await;
        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));

        let err = reconciler.tick().await.unwrap_err();

        assert_eq!(err.phase, TickPhase::Deciding);
        assert!(matches!(err.source, ReplicantError::EmptyMetrics));
        assert_eq!(cluster.replicas(NS, WorkloadKind::Deployment, "web").await, Some(3));
    }

    #[tokio::test]
    async fn update_failure_reported_from_applying() {
        let cluster = hot_cluster().await;
        cluster.fail_update("web").await;
        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));

        let err = reconciler.tick().await.unwrap_err();

        assert_eq!(err.phase, TickPhase::Applying);
        assert_eq!(err.source.class(), ErrorClass::PartialApply);
        assert!(err.to_string().starts_with("applying failed"));
    }

    #[tokio::test]
    async fn run_rejects_bad_config_before_looping() {
        let cluster = InMemoryCluster::new();
        let (_tx, rx) = watch::channel(false);
        let policy = PolicyConfig {
            min_replicas: 4,
            max_replicas: 2,
            ..Default::default()
        };

        let err = run(Arc::new(cluster.clone()), "app=web", NS, policy, Duration::from_secs(1), rx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicantError::Config(_)));
        assert_eq!(cluster.list_instances_calls().await, 0);
    }

    #[tokio::test]
    async fn run_accepts_sub_millisecond_period() {
        let cluster = InMemoryCluster::new();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let result = run(
            Arc::new(cluster),
            "app=web",
            NS,
            PolicyConfig::default(),
            Duration::from_micros(500),
            rx,
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_rejects_zero_period() {
        let (_tx, rx) = watch::channel(false);
        let err = run(
            Arc::new(InMemoryCluster::new()),
            "app=web",
            NS,
            PolicyConfig::default(),
            Duration::ZERO,
            rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ReplicantError::Config(_)));
    }

    #[tokio::test]
    async fn run_can_be_spawned() {
        let cluster = hot_cluster().await;
        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { reconciler.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_already_cancelled() {
        let cluster = hot_cluster().await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let reconciler = Reconciler::new(&settings(false), Arc::new(cluster.clone()));
        reconciler.run(rx).await;

        assert_eq!(cluster.list_instances_calls().await, 0);
    }

    #[test]
    fn phase_display() {
        assert_eq!(TickPhase::Sampling.to_string(), "sampling");
        assert_eq!(TickPhase::Applying.to_string(), "applying");
    }

    #[test]
    fn outcome_serializes() {
        let outcome = TickOutcome {
            aggregate: AggregateUtilization {
                mean_cpu_ratio: 85.0,
                mean_memory_ratio: 40.0,
                sample_count: 3,
            },
            decision: ScalingDecision::ScaleTo(4),
            updated: vec![],
            dry_run: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["decision"]["replicas"], 4);
        assert_eq!(json["aggregate"]["sample_count"], 3);
    }
}
