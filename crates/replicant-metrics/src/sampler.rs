//! Relates per-instance usage to declared limits.
//!
//! One sample per running instance per tick. Usage reads run with bounded
//! concurrency and are fully collected before the samples are returned, so
//! the decision engine always sees one consistent snapshot.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use replicant_cluster::{with_timeout, ClusterApi};
use replicant_core::{
    ContainerUsage, Instance, InstancePhase, ReplicantError, ReplicantResult, Resource,
    UtilizationSample,
};

const DEFAULT_CONCURRENCY: usize = 8;

/// Declared limits of one instance, both known to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredLimits {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl DeclaredLimits {
    /// Resolve an instance's limits, failing if either is undeclared or zero.
    pub fn of(instance: &Instance) -> ReplicantResult<Self> {
        let resolve = |resource| match instance.limit(resource) {
            Some(limit) if limit > 0 => Ok(limit),
            _ => Err(ReplicantError::MissingLimit {
                instance: instance.name.clone(),
                resource,
            }),
        };
        Ok(Self {
            cpu_millis: resolve(Resource::Cpu)?,
            memory_bytes: resolve(Resource::Memory)?,
        })
    }
}

/// Samples utilization for every running instance matching a selector.
pub struct UtilizationSampler {
    cluster: Arc<dyn ClusterApi>,
    call_timeout: Duration,
    concurrency: usize,
}

impl UtilizationSampler {
    pub fn new(cluster: Arc<dyn ClusterApi>, call_timeout: Duration) -> Self {
        Self {
            cluster,
            call_timeout,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Bound the number of usage reads in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// List matching instances and sample each of them.
    ///
    /// Any failure (listing, a missing limit, a usage read) fails the
    /// whole tick.
    pub async fn sample(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ReplicantResult<Vec<UtilizationSample>> {
        let instances = with_timeout(
            "list instances",
            self.call_timeout,
            self.cluster.list_instances(namespace, selector),
        )
        .await?;

        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        debug!(%namespace, %selector, instances = ?names, "listed instances");

        self.sample_instances(namespace, &instances).await
    }

    /// Sample an already-listed set of instances.
    pub async fn sample_instances(
        &self,
        namespace: &str,
        instances: &[Instance],
    ) -> ReplicantResult<Vec<UtilizationSample>> {
        let mut running = Vec::with_capacity(instances.len());
        for instance in instances {
            if instance.phase != InstancePhase::Running {
                debug!(instance = %instance.name, phase = ?instance.phase, "skipping instance that is not running");
                continue;
            }
            // Limits are checked for every instance before any usage read.
            running.push((instance, DeclaredLimits::of(instance)?));
        }

        let reads: Vec<_> = running
            .into_iter()
            .map(|(instance, limits)| self.sample_one(namespace, instance, limits))
            .collect();

        stream::iter(reads)
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    async fn sample_one(
        &self,
        namespace: &str,
        instance: &Instance,
        limits: DeclaredLimits,
    ) -> ReplicantResult<UtilizationSample> {
        let usage = with_timeout(
            "read usage",
            self.call_timeout,
            self.cluster.read_usage(namespace, &instance.name),
        )
        .await?;

        let sample = utilization(&instance.name, limits, &usage)?;
        debug!(
            instance = %sample.instance_id,
            cpu_pct = sample.cpu_ratio,
            memory_pct = sample.memory_ratio,
            "sampled instance"
        );
        Ok(sample)
    }
}

/// Sum container usage and express it as a percentage of the limits.
pub fn utilization(
    instance_id: &str,
    limits: DeclaredLimits,
    usage: &[ContainerUsage],
) -> ReplicantResult<UtilizationSample> {
    if usage.is_empty() {
        return Err(ReplicantError::NoUsage {
            instance: instance_id.to_string(),
        });
    }

    let total_cpu = usage
        .iter()
        .fold(0u64, |acc, c| acc.saturating_add(c.cpu_millis));
    let total_memory = usage
        .iter()
        .fold(0u64, |acc, c| acc.saturating_add(c.memory_bytes));

    Ok(UtilizationSample {
        instance_id: instance_id.to_string(),
        cpu_ratio: total_cpu as f64 / limits.cpu_millis as f64 * 100.0,
        memory_ratio: total_memory as f64 / limits.memory_bytes as f64 * 100.0,
    })
}
