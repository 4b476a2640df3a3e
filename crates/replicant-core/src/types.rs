//! Domain types shared by the sampler, decision engine and scaler.
//!
//! Everything here is per-tick data except `PolicyConfig`, which is fixed
//! for the lifetime of the process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicantError, ReplicantResult};

/// Name of a running instance (a pod).
pub type InstanceId = String;

// ── Instances ─────────────────────────────────────────────────────

/// Lifecycle phase of an instance as reported by the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstancePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl InstancePhase {
    /// Map a registry phase string ("Running", "Pending", ...) to a phase.
    pub fn from_registry(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Declared resource limits of one container. `None` means undeclared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerLimits {
    pub name: String,
    pub cpu_millis: Option<u64>,
    pub memory_bytes: Option<u64>,
}

/// A running unit of work contributing one utilization sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub name: InstanceId,
    pub phase: InstancePhase,
    pub containers: Vec<ContainerLimits>,
}

impl Instance {
    /// Sum of the declared limits for `resource` across all containers.
    ///
    /// Returns `None` if the instance has no containers or any container
    /// leaves the limit undeclared.
    pub fn limit(&self, resource: Resource) -> Option<u64> {
        if self.containers.is_empty() {
            return None;
        }
        self.containers.iter().try_fold(0u64, |acc, c| {
            let limit = match resource {
                Resource::Cpu => c.cpu_millis,
                Resource::Memory => c.memory_bytes,
            }?;
            Some(acc.saturating_add(limit))
        })
    }
}

/// Current consumption of one container.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerUsage {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// The two resources the autoscaler samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cpu,
    Memory,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => f.write_str("cpu"),
            Resource::Memory => f.write_str("memory"),
        }
    }
}

// ── Samples and decisions ─────────────────────────────────────────

/// Utilization of one instance for one tick, as percentages of its limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilizationSample {
    pub instance_id: InstanceId,
    pub cpu_ratio: f64,
    pub memory_ratio: f64,
}

/// Means over one tick's samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AggregateUtilization {
    pub mean_cpu_ratio: f64,
    pub mean_memory_ratio: f64,
    pub sample_count: u32,
}

/// Outcome of the decision engine for one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "replicas", rename_all = "snake_case")]
pub enum ScalingDecision {
    /// Set every matching workload to this replica count.
    ScaleTo(u32),
    /// Leave workloads untouched.
    Hold,
}

/// Scaling bounds and thresholds. Immutable once the loop starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Percent of limit at or above which the group scales up.
    pub scale_up_threshold_pct: f64,
    /// Percent of limit at or below which the group scales down.
    pub scale_down_threshold_pct: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            scale_up_threshold_pct: 80.0,
            scale_down_threshold_pct: 20.0,
        }
    }
}

impl PolicyConfig {
    /// Check bounds and threshold ordering.
    pub fn validate(&self) -> ReplicantResult<()> {
        if self.max_replicas < self.min_replicas {
            return Err(ReplicantError::Config(format!(
                "max_replicas ({}) is below min_replicas ({})",
                self.max_replicas, self.min_replicas
            )));
        }
        for (name, value) in [
            ("scale_up_threshold_pct", self.scale_up_threshold_pct),
            ("scale_down_threshold_pct", self.scale_down_threshold_pct),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ReplicantError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.scale_down_threshold_pct >= self.scale_up_threshold_pct {
            return Err(ReplicantError::Config(format!(
                "scale_down_threshold_pct ({}) must be below scale_up_threshold_pct ({})",
                self.scale_down_threshold_pct, self.scale_up_threshold_pct
            )));
        }
        Ok(())
    }
}

// ── Workloads ─────────────────────────────────────────────────────

/// Kinds of scalable workloads the scaler knows how to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::ReplicaSet => "replicaset",
            WorkloadKind::StatefulSet => "statefulset",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = ReplicantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(Self::Deployment),
            "replicaset" | "replicasets" | "rs" => Ok(Self::ReplicaSet),
            "statefulset" | "statefulsets" | "sts" => Ok(Self::StatefulSet),
            other => Err(ReplicantError::Config(format!(
                "unknown workload kind: {other}"
            ))),
        }
    }
}

/// A scalable workload as listed from the registry this tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalableTarget {
    pub kind: WorkloadKind,
    pub name: String,
    pub current_replicas: u32,
}
