//! Decision engine: turns one tick's samples into a scaling decision.
//!
//! Pure: the same samples and policy always produce the same decision, and
//! nothing is carried from one tick to the next.

use tracing::debug;

use replicant_core::{
    AggregateUtilization, PolicyConfig, ReplicantError, ReplicantResult, ScalingDecision,
    UtilizationSample,
};

/// Evaluates aggregate utilization against a fixed policy.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    policy: PolicyConfig,
}

impl DecisionEngine {
    pub fn new(policy: PolicyConfig) -> Self {
        Self { policy }
    }

    /// Mean CPU and memory ratio over the samples.
    pub fn aggregate(samples: &[UtilizationSample]) -> ReplicantResult<AggregateUtilization> {
        if samples.is_empty() {
            return Err(ReplicantError::EmptyMetrics);
        }

        let count = samples.len() as f64;
        let total_cpu: f64 = samples.iter().map(|s| s.cpu_ratio).sum();
        let total_memory: f64 = samples.iter().map(|s| s.memory_ratio).sum();

        Ok(AggregateUtilization {
            mean_cpu_ratio: total_cpu / count,
            mean_memory_ratio: total_memory / count,
            sample_count: u32::try_from(samples.len()).unwrap_or(u32::MAX),
        })
    }

    /// Decide for one tick.
    pub fn decide(&self, samples: &[UtilizationSample]) -> ReplicantResult<ScalingDecision> {
        self.evaluate(samples).map(|(_, decision)| decision)
    }

    /// Decide for one tick, returning the aggregate the decision was based on.
    pub fn evaluate(
        &self,
        samples: &[UtilizationSample],
    ) -> ReplicantResult<(AggregateUtilization, ScalingDecision)> {
        let aggregate = Self::aggregate(samples)?;
        Ok((aggregate, self.decide_aggregate(&aggregate)))
    }

    /// Apply the threshold rules to an aggregate.
    ///
    /// Scale up if *either* resource is at or above the up threshold; scale
    /// down only if *both* are at or below the down threshold. Up wins when
    /// both hold. The target moves one replica away from the sample count
    /// and never leaves `[min_replicas, max_replicas]`.
    pub fn decide_aggregate(&self, aggregate: &AggregateUtilization) -> ScalingDecision {
        let p = &self.policy;
        let count = aggregate.sample_count;
        let cpu = aggregate.mean_cpu_ratio;
        let memory = aggregate.mean_memory_ratio;

        if cpu >= p.scale_up_threshold_pct || memory >= p.scale_up_threshold_pct {
            let target = count
                .saturating_add(1)
                .min(p.max_replicas)
                .max(p.min_replicas);
            debug!(count, cpu, memory, target, "above scale-up threshold");
            return ScalingDecision::ScaleTo(target);
        }

        if cpu <= p.scale_down_threshold_pct && memory <= p.scale_down_threshold_pct {
            let target = count
                .saturating_sub(1)
                .max(p.min_replicas)
                .min(p.max_replicas);
            debug!(count, cpu, memory, target, "below scale-down threshold");
            return ScalingDecision::ScaleTo(target);
        }

        ScalingDecision::Hold
    }
}
