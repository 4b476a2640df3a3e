//! replicant.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicantError, ReplicantResult};
use crate::selector::LabelSelector;
use crate::types::{PolicyConfig, WorkloadKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicantConfig {
    pub target: TargetConfig,
    pub policy: PolicyConfig,
    pub reconcile: ReconcileConfig,
}

/// Which instances are sampled and which workloads are scaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub namespace: String,
    pub selector: String,
    pub kinds: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            selector: String::new(),
            kinds: vec!["deployment".to_string(), "replicaset".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Time between ticks (e.g., "60s").
    pub period: String,
    /// Upper bound on any single registry call (e.g., "10s").
    pub call_timeout: String,
    /// Concurrent usage reads per tick.
    pub sample_concurrency: usize,
    /// Decide but never update workloads.
    pub dry_run: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            period: "60s".to_string(),
            call_timeout: "10s".to_string(),
            sample_concurrency: 8,
            dry_run: false,
        }
    }
}

/// Configuration after validation, with every string parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace: String,
    pub selector: LabelSelector,
    pub kinds: Vec<WorkloadKind>,
    pub policy: PolicyConfig,
    pub period: Duration,
    pub call_timeout: Duration,
    pub sample_concurrency: usize,
    pub dry_run: bool,
}

impl ReplicantConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReplicantConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate every field and produce parsed settings.
    ///
    /// Any error here is fatal: the loop must not start.
    pub fn validate(&self) -> ReplicantResult<Settings> {
        let period = parse_duration(&self.reconcile.period).ok_or_else(|| {
            ReplicantError::Config(format!(
                "period: invalid duration {:?}",
                self.reconcile.period
            ))
        })?;
        self.validate_with_period(period)
    }

    /// Like [`validate`](Self::validate), but with the tick period given
    /// directly instead of parsed from `reconcile.period`.
    pub fn validate_with_period(&self, period: Duration) -> ReplicantResult<Settings> {
        let namespace = self.target.namespace.trim();
        if namespace.is_empty() {
            return Err(ReplicantError::Config(
                "namespace must not be empty".to_string(),
            ));
        }

        let selector = LabelSelector::parse(&self.target.selector)?;

        if self.target.kinds.is_empty() {
            return Err(ReplicantError::Config(
                "at least one workload kind is required".to_string(),
            ));
        }
        let mut kinds = Vec::with_capacity(self.target.kinds.len());
        for kind in &self.target.kinds {
            let kind: WorkloadKind = kind.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        self.policy.validate()?;

        if period.is_zero() {
            return Err(ReplicantError::Config("period must be non-zero".to_string()));
        }
        let call_timeout = required_duration("call_timeout", &self.reconcile.call_timeout)?;

        if self.reconcile.sample_concurrency == 0 {
            return Err(ReplicantError::Config(
                "sample_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(Settings {
            namespace: namespace.to_string(),
            selector,
            kinds,
            policy: self.policy.clone(),
            period,
            call_timeout,
            sample_concurrency: self.reconcile.sample_concurrency,
            dry_run: self.reconcile.dry_run,
        })
    }
}

fn required_duration(field: &str, value: &str) -> ReplicantResult<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err(ReplicantError::Config(format!("{field} must be non-zero"))),
        None => Err(ReplicantError::Config(format!(
            "{field}: invalid duration {value:?}"
        ))),
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
