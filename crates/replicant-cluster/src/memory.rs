//! In-process workload registry.
//!
//! Backs the test suites. Holds labelled instances, usage readings
//! and workloads per namespace, evaluates selectors with [`LabelSelector`],
//! and can inject failures or latency into any operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use replicant_core::{
    ContainerUsage, Instance, LabelSelector, ReplicantError, ReplicantResult, ScalableTarget,
    WorkloadKind,
};

use crate::api::{ClusterApi, ClusterFuture};

/// One `update_replicas` call as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
    pub replicas: u32,
}

struct StoredInstance {
    namespace: String,
    labels: BTreeMap<String, String>,
    instance: Instance,
}

struct StoredWorkload {
    namespace: String,
    labels: BTreeMap<String, String>,
    target: ScalableTarget,
}

#[derive(Default)]
struct Faults {
    list_instances: bool,
    usage: HashSet<String>,
    list_kinds: HashSet<WorkloadKind>,
    updates: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    instances: Vec<StoredInstance>,
    usage: HashMap<(String, String), Vec<ContainerUsage>>,
    workloads: Vec<StoredWorkload>,
    faults: Faults,
    latency: Duration,
    updates: Vec<UpdateCall>,
    list_instances_calls: usize,
}

/// A `ClusterApi` whose state lives in memory. Cheap to clone; clones share
/// state.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance with the given labels.
    pub async fn add_instance(&self, namespace: &str, labels: &[(&str, &str)], instance: Instance) {
        let mut inner = self.inner.lock().await;
        inner.instances.retain(|s| {
            !(s.namespace == namespace && s.instance.name == instance.name)
        });
        inner.instances.push(StoredInstance {
            namespace: namespace.to_string(),
            labels: to_labels(labels),
            instance,
        });
    }

    /// Set the usage readings returned for an instance.
    pub async fn set_usage(&self, namespace: &str, instance: &str, usage: Vec<ContainerUsage>) {
        let mut inner = self.inner.lock().await;
        inner
            .usage
            .insert((namespace.to_string(), instance.to_string()), usage);
    }

    /// Register a scalable workload with the given labels.
    pub async fn add_workload(
        &self,
        namespace: &str,
        labels: &[(&str, &str)],
        kind: WorkloadKind,
        name: &str,
        replicas: u32,
    ) {
        let mut inner = self.inner.lock().await;
        inner.workloads.push(StoredWorkload {
            namespace: namespace.to_string(),
            labels: to_labels(labels),
            target: ScalableTarget {
                kind,
                name: name.to_string(),
                current_replicas: replicas,
            },
        });
    }

    /// Current replica count of a workload, if it exists.
    pub async fn replicas(&self, namespace: &str, kind: WorkloadKind, name: &str) -> Option<u32> {
        let inner = self.inner.lock().await;
        inner
            .workloads
            .iter()
            .find(|w| w.namespace == namespace && w.target.kind == kind && w.target.name == name)
            .map(|w| w.target.current_replicas)
    }

    /// Every update call received so far, successful or injected-failed.
    pub async fn updates(&self) -> Vec<UpdateCall> {
        self.inner.lock().await.updates.clone()
    }

    /// How many times instances have been listed.
    pub async fn list_instances_calls(&self) -> usize {
        self.inner.lock().await.list_instances_calls
    }

    pub async fn fail_list_instances(&self, fail: bool) {
        self.inner.lock().await.faults.list_instances = fail;
    }

    pub async fn fail_usage(&self, instance: &str) {
        self.inner
            .lock()
            .await
            .faults
            .usage
            .insert(instance.to_string());
    }

    pub async fn fail_list(&self, kind: WorkloadKind) {
        self.inner.lock().await.faults.list_kinds.insert(kind);
    }

    pub async fn fail_update(&self, name: &str) {
        self.inner
            .lock()
            .await
            .faults
            .updates
            .insert(name.to_string());
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults = Faults::default();
    }

    /// Delay every operation by `latency` before answering.
    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    async fn delay(&self) {
        let latency = self.inner.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl ClusterApi for InMemoryCluster {
    fn list_instances<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> ClusterFuture<'a, Vec<Instance>> {
        Box::pin(async move {
            // Counted on entry so calls abandoned by a timeout still show up.
            self.inner.lock().await.list_instances_calls += 1;
            self.delay().await;
            let selector = parse_selector("list instances", selector)?;
            let inner = self.inner.lock().await;
            if inner.faults.list_instances {
                return Err(injected("list instances"));
            }
            let instances: Vec<Instance> = inner
                .instances
                .iter()
                .filter(|s| s.namespace == namespace && selector.matches(&s.labels))
                .map(|s| s.instance.clone())
                .collect();
            debug!(%namespace, count = instances.len(), "listed in-memory instances");
            Ok(instances)
        })
    }

    fn read_usage<'a>(
        &'a self,
        namespace: &'a str,
        instance: &'a str,
    ) -> ClusterFuture<'a, Vec<ContainerUsage>> {
        Box::pin(async move {
            self.delay().await;
            let inner = self.inner.lock().await;
            if inner.faults.usage.contains(instance) {
                return Err(injected("read usage"));
            }
            inner
                .usage
                .get(&(namespace.to_string(), instance.to_string()))
                .cloned()
                .ok_or_else(|| ReplicantError::Fetch {
                    operation: "read usage",
                    reason: format!("no metrics for {namespace}/{instance}"),
                })
        })
    }

    fn list_workloads<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
        kind: WorkloadKind,
    ) -> ClusterFuture<'a, Vec<ScalableTarget>> {
        Box::pin(async move {
            self.delay().await;
            let selector = parse_selector("list workloads", selector)?;
            let inner = self.inner.lock().await;
            if inner.faults.list_kinds.contains(&kind) {
                return Err(injected("list workloads"));
            }
            Ok(inner
                .workloads
                .iter()
                .filter(|w| {
                    w.namespace == namespace && w.target.kind == kind && selector.matches(&w.labels)
                })
                .map(|w| w.target.clone())
                .collect())
        })
    }

    fn update_replicas<'a>(
        &'a self,
        namespace: &'a str,
        kind: WorkloadKind,
        name: &'a str,
        replicas: u32,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.inner.lock().await;
            inner.updates.push(UpdateCall {
                namespace: namespace.to_string(),
                kind,
                name: name.to_string(),
                replicas,
            });
            if inner.faults.updates.contains(name) {
                return Err(ReplicantError::Update {
                    kind,
                    name: name.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            let workload = inner
                .workloads
                .iter_mut()
                .find(|w| w.namespace == namespace && w.target.kind == kind && w.target.name == name)
                .ok_or_else(|| ReplicantError::Update {
                    kind,
                    name: name.to_string(),
                    reason: "not found".to_string(),
                })?;
            workload.target.current_replicas = replicas;
            Ok(())
        })
    }
}

fn to_labels(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_selector(operation: &'static str, selector: &str) -> ReplicantResult<LabelSelector> {
    LabelSelector::parse(selector).map_err(|e| ReplicantError::Fetch {
        operation,
        reason: e.to_string(),
    })
}

fn injected(operation: &'static str) -> ReplicantError {
    ReplicantError::Fetch {
        operation,
        reason: "injected failure".to_string(),
    }
}
