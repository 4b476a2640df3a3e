//! replicant-kube — Kubernetes registry backend.
//!
//! Implements [`ClusterApi`](replicant_cluster::ClusterApi) against a live
//! cluster: instances are pods matched by label selector, usage readings
//! come from the resource metrics API, and Deployments, ReplicaSets and
//! StatefulSets are scaled by patching `spec.replicas`.

pub mod cluster;
pub mod quantity;

pub use cluster::{instance_from_pod, usage_from_metrics, KubeCluster};
