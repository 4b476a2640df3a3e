//! `ClusterApi` over the Kubernetes API.
//!
//! Instances are pods, usage comes from `metrics.k8s.io/v1beta1`
//! `PodMetrics`, and workloads are Deployments, ReplicaSets and
//! StatefulSets updated through a JSON merge patch on `spec.replicas`.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{
    Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use replicant_cluster::{ClusterApi, ClusterFuture};
use replicant_core::{
    ContainerLimits, ContainerUsage, Instance, InstancePhase, ReplicantError, ReplicantResult,
    ScalableTarget, WorkloadKind,
};

use crate::quantity;

/// Kubernetes-backed workload registry.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using an explicit kubeconfig, or the in-cluster/default
    /// configuration when `kubeconfig` is `None`.
    pub async fn connect(kubeconfig: Option<&Path>) -> anyhow::Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                info!(path = %path.display(), "using kubeconfig");
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self::new(client))
    }
}

impl ClusterApi for KubeCluster {
    fn list_instances<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> ClusterFuture<'a, Vec<Instance>> {
        Box::pin(async move {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let list = pods
                .list(&ListParams::default().labels(selector))
                .await
                .map_err(|e| fetch_error("list instances", e))?;
            debug!(%namespace, %selector, count = list.items.len(), "listed pods");
            Ok(list.items.iter().map(instance_from_pod).collect())
        })
    }

    fn read_usage<'a>(
        &'a self,
        namespace: &'a str,
        instance: &'a str,
    ) -> ClusterFuture<'a, Vec<ContainerUsage>> {
        Box::pin(async move {
            let api: Api<DynamicObject> =
                Api::namespaced_with(self.client.clone(), namespace, &pod_metrics_resource());
            let metrics = api
                .get(instance)
                .await
                .map_err(|e| fetch_error("read usage", e))?;
            usage_from_metrics(instance, &metrics.data)
        })
    }

    fn list_workloads<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
        kind: WorkloadKind,
    ) -> ClusterFuture<'a, Vec<ScalableTarget>> {
        Box::pin(async move {
            let client = self.client.clone();
            match kind {
                WorkloadKind::Deployment => {
                    list_targets(
                        Api::<Deployment>::namespaced(client, namespace),
                        selector,
                        kind,
                        |d| d.spec.as_ref().and_then(|s| s.replicas),
                    )
                    .await
                }
                WorkloadKind::ReplicaSet => {
                    list_targets(
                        Api::<ReplicaSet>::namespaced(client, namespace),
                        selector,
                        kind,
                        |rs| rs.spec.as_ref().and_then(|s| s.replicas),
                    )
                    .await
                }
                WorkloadKind::StatefulSet => {
                    list_targets(
                        Api::<StatefulSet>::namespaced(client, namespace),
                        selector,
                        kind,
                        |sts| sts.spec.as_ref().and_then(|s| s.replicas),
                    )
                    .await
                }
            }
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
            let client = self.client.clone();
            match kind {
                WorkloadKind::Deployment => {
                    patch_replicas(Api::<Deployment>::namespaced(client, namespace), kind, name, replicas)
                        .await
                }
                WorkloadKind::ReplicaSet => {
                    patch_replicas(Api::<ReplicaSet>::namespaced(client, namespace), kind, name, replicas)
                        .await
                }
                WorkloadKind::StatefulSet => {
                    patch_replicas(Api::<StatefulSet>::namespaced(client, namespace), kind, name, replicas)
                        .await
                }
            }
        })
    }
}

async fn list_targets<K>(
    api: Api<K>,
    selector: &str,
    kind: WorkloadKind,
    replicas: fn(&K) -> Option<i32>,
) -> ReplicantResult<Vec<ScalableTarget>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|e| fetch_error("list workloads", e))?;

    Ok(list
        .items
        .iter()
        .map(|obj| ScalableTarget {
            kind,
            name: obj.name_any(),
            // An unset replica count defaults to one.
            current_replicas: u32::try_from(replicas(obj).unwrap_or(1)).unwrap_or(0),
        })
        .collect())
}

async fn patch_replicas<K>(
    api: Api<K>,
    kind: WorkloadKind,
    name: &str,
    replicas: u32,
) -> ReplicantResult<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = json!({ "spec": { "replicas": replicas } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map(|_| ())
        .map_err(|e| ReplicantError::Update {
            kind,
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn pod_metrics_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
    ApiResource::from_gvk_with_plural(&gvk, "pods")
}

fn fetch_error(operation: &'static str, err: kube::Error) -> ReplicantError {
    ReplicantError::Fetch {
        operation,
        reason: err.to_string(),
    }
}

/// Convert a pod into an instance with per-container limits.
pub fn instance_from_pod(pod: &Pod) -> Instance {
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(container_limits).collect())
        .unwrap_or_default();

    Instance {
        name: pod.name_any(),
        phase: InstancePhase::from_registry(
            pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        ),
        containers,
    }
}

fn container_limits(container: &Container) -> ContainerLimits {
    let limits = container
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref());

    ContainerLimits {
        name: container.name.clone(),
        cpu_millis: limit(limits, "cpu").and_then(quantity::cpu_millis),
        memory_bytes: limit(limits, "memory").and_then(quantity::memory_bytes),
    }
}

fn limit<'a>(limits: Option<&'a BTreeMap<String, Quantity>>, key: &str) -> Option<&'a str> {
    limits.and_then(|l| l.get(key)).map(|q| q.0.as_str())
}

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    #[serde(default)]
    name: String,
    #[serde(default)]
    usage: BTreeMap<String, String>,
}

/// Extract per-container usage from a `PodMetrics` body.
pub fn usage_from_metrics(
    instance: &str,
    data: &serde_json::Value,
) -> ReplicantResult<Vec<ContainerUsage>> {
    let containers: Vec<ContainerMetrics> = match data.get("containers") {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| ReplicantError::Fetch {
            operation: "read usage",
            reason: format!("malformed metrics for {instance}: {e}"),
        })?,
        None => Vec::new(),
    };

    containers
        .iter()
        .map(|c| {
            let unreadable = |resource: &str| ReplicantError::Fetch {
                operation: "read usage",
                reason: format!("unreadable {resource} usage for {instance}/{}", c.name),
            };
            Ok(ContainerUsage {
                cpu_millis: c
                    .usage
                    .get("cpu")
                    .and_then(|q| quantity::cpu_millis(q))
                    .ok_or_else(|| unreadable("cpu"))?,
                memory_bytes: c
                    .usage
                    .get("memory")
                    .and_then(|q| quantity::memory_bytes(q))
                    .ok_or_else(|| unreadable("memory"))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn container(name: &str, limits: &[(&str, &str)]) -> Container {
        Container {
            name: name.to_string(),
            resources: Some(ResourceRequirements {
                limits: Some(
                    limits
                        .iter()
                        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(name: &str, phase: &str, containers: Vec<Container>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn pod_limits_are_parsed_per_container() {
        let pod = pod(
            "web-0",
            "Running",
            vec![
                container("app", &[("cpu", "500m"), ("memory", "256Mi")]),
                container("sidecar", &[("cpu", "100m"), ("memory", "64Mi")]),
            ],
        );

        let inst = instance_from_pod(&pod);

        assert_eq!(inst.name, "web-0");
        assert_eq!(inst.phase, InstancePhase::Running);
        assert_eq!(inst.containers.len(), 2);
        assert_eq!(inst.containers[0].cpu_millis, Some(500));
        assert_eq!(inst.containers[0].memory_bytes, Some(256 * 1024 * 1024));
        assert_eq!(inst.containers[1].cpu_millis, Some(100));
    }

    #[test]
    fn pod_without_limits_has_undeclared_limits() {
        let mut bare = container("app", &[]);
        bare.resources = None;
        let inst = instance_from_pod(&pod("web-0", "Pending", vec![bare]));

        assert_eq!(inst.phase, InstancePhase::Pending);
        assert_eq!(inst.containers[0].cpu_millis, None);
        assert_eq!(inst.containers[0].memory_bytes, None);
    }

    #[test]
    fn pod_metrics_body_is_parsed() {
        let data = json!({
            "timestamp": "2026-01-01T00:00:00Z",
            "window": "30s",
            "containers": [
                { "name": "app", "usage": { "cpu": "412345678n", "memory": "131072Ki" } },
                { "name": "sidecar", "usage": { "cpu": "5m", "memory": "16Mi" } }
            ]
        });

        let usage = usage_from_metrics("web-0", &data).unwrap();

        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].cpu_millis, 413);
        assert_eq!(usage[0].memory_bytes, 131072 * 1024);
        assert_eq!(usage[1].cpu_millis, 5);
        assert_eq!(usage[1].memory_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn missing_containers_yields_no_usage() {
        let usage = usage_from_metrics("web-0", &json!({ "window": "30s" })).unwrap();
        assert!(usage.is_empty());
    }

    #[test]
    fn unreadable_usage_is_fetch_error() {
        let data = json!({ "containers": [ { "name": "app", "usage": { "cpu": "lots" } } ] });
        let err = usage_from_metrics("web-0", &data).unwrap_err();
        match err {
            ReplicantError::Fetch { operation, reason } => {
                assert_eq!(operation, "read usage");
                assert!(reason.contains("cpu"));
                assert!(reason.contains("web-0/app"));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[test]
    fn pod_metrics_resource_targets_metrics_api() {
        let resource = pod_metrics_resource();
        assert_eq!(resource.group, "metrics.k8s.io");
        assert_eq!(resource.version, "v1beta1");
        assert_eq!(resource.plural, "pods");
        assert_eq!(resource.api_version, "metrics.k8s.io/v1beta1");
    }
}
