//! Error types for the autoscaler core.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Resource, WorkloadKind};

/// Result type alias for autoscaler operations.
pub type ReplicantResult<T> = Result<T, ReplicantError>;

/// A single workload update that failed during an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    pub kind: WorkloadKind,
    pub name: String,
    pub reason: String,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.kind, self.name, self.reason)
    }
}

/// Errors that can occur while sampling, deciding or applying.
#[derive(Debug, Error)]
pub enum ReplicantError {
    #[error("{operation} failed: {reason}")]
    Fetch {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("instance {instance} declares no {resource} limit")]
    MissingLimit { instance: String, resource: Resource },

    #[error("no usage reported for instance {instance}")]
    NoUsage { instance: String },

    #[error("no utilization samples available")]
    EmptyMetrics,

    #[error("failed to update {kind} {name}: {reason}")]
    Update {
        kind: WorkloadKind,
        name: String,
        reason: String,
    },

    /// Some workload updates failed. `aborted` holds the listing error when
    /// the apply also stopped before reaching every kind.
    #[error("{}", describe_partial(.failures, .aborted.as_deref()))]
    PartialApply {
        failures: Vec<ApplyFailure>,
        aborted: Option<String>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// How the reconciliation loop treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Abort the tick; the next period retries.
    Transient,
    /// Some workloads were updated and some were not.
    PartialApply,
    /// Refuse to start.
    Fatal,
}

impl ReplicantError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ReplicantError::Fetch { .. }
            | ReplicantError::Timeout { .. }
            | ReplicantError::MissingLimit { .. }
            | ReplicantError::NoUsage { .. }
            | ReplicantError::EmptyMetrics => ErrorClass::Transient,
            ReplicantError::Update { .. } | ReplicantError::PartialApply { .. } => {
                ErrorClass::PartialApply
            }
            ReplicantError::Config(_) => ErrorClass::Fatal,
        }
    }

    /// Names of the workloads a partial apply failed to update.
    pub fn failed_workloads(&self) -> Vec<&str> {
        match self {
            ReplicantError::PartialApply { failures, .. } => {
                failures.iter().map(|f| f.name.as_str()).collect()
            }
            ReplicantError::Update { name, .. } => vec![name.as_str()],
            _ => Vec::new(),
        }
    }
}

fn describe_partial(failures: &[ApplyFailure], aborted: Option<&str>) -> String {
    let joined = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    let mut msg = format!("{} workload update(s) failed: {joined}", failures.len());
    if let Some(reason) = aborted {
        msg.push_str(&format!("; apply stopped early: {reason}"));
    }
    msg
}
