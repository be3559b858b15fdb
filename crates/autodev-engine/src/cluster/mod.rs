//! Cluster adapter: thin façade over the container-orchestration API.
//!
//! The session engine consumes the narrow [`ClusterBackend`] surface below —
//! persistent claims, deployments, pods-by-label, a front service, a shared
//! ingress object, and follow-log streams. Backends report structured errors
//! distinguishing `NotFound`, `AlreadyExists`, and transport failure; deletes
//! are idempotent (a missing object is success) so lifecycle cleanup can be
//! retried safely.
//!
//! Two backends are provided: [`KubeCluster`] for real clusters and
//! [`MemoryCluster`] for tests.

mod kube;
mod memory;

pub use self::kube::KubeCluster;
pub use self::memory::MemoryCluster;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use autodev_core::Result;

/// A follow-log byte stream. The caller owns closing (dropping) it.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// An environment variable injected into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// A volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume name, matching a [`VolumeRef`] on the deployment.
    pub name: String,
    /// Mount path inside the container.
    pub mount_path: String,
}

/// A container within a session deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name (the component ID).
    pub name: String,
    /// Container image.
    pub image: String,
    /// The single exposed container port.
    pub port: i32,
    /// Environment variables.
    pub env: Vec<EnvVar>,
    /// Volume mounts.
    pub volume_mounts: Vec<VolumeMount>,
}

/// A pod volume backed by a persistent claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRef {
    /// Volume name referenced by container mounts.
    pub name: String,
    /// Name of the backing persistent claim.
    pub claim: String,
}

/// Desired state for a session deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    /// Deployment and pod-selector name.
    pub name: String,
    /// Labels applied to the deployment selector and pod template.
    pub labels: BTreeMap<String, String>,
    /// Desired replica count.
    pub replicas: i32,
    /// Containers of the single pod template.
    pub containers: Vec<ContainerSpec>,
    /// Volumes referenced by the containers.
    pub volumes: Vec<VolumeRef>,
}

/// Observed deployment readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentStatus {
    /// Number of ready replicas.
    pub ready_replicas: i32,
}

/// Metadata about a persistent claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMeta {
    /// Claim name.
    pub name: String,
    /// Requested storage capacity, if reported.
    pub capacity: Option<String>,
}

/// A port published by the session's front service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    /// Port name (the component ID).
    pub name: String,
    /// Service port.
    pub port: i32,
    /// Target container port.
    pub target_port: i32,
}

/// Desired state for a session's front service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name.
    pub name: String,
    /// Pod selector.
    pub selector: BTreeMap<String, String>,
    /// Published ports.
    pub ports: Vec<ServicePort>,
}

/// One host-based routing rule in the shared ingress object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    /// Hostname the rule matches.
    pub host: String,
    /// Backing service name.
    pub service: String,
    /// Backing service port.
    pub service_port: i32,
}

/// The shared ingress object, reduced to the rules the engine manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressDef {
    /// Ingress object name.
    pub name: String,
    /// Host routing rules.
    pub rules: Vec<IngressRule>,
}

/// Raw per-container runtime state reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStateKind {
    /// The container is running.
    Running,
    /// The container has terminated.
    Terminated,
    /// The container is waiting to start.
    Waiting,
}

/// A pod observed in the cluster.
#[derive(Debug, Clone)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Names of the containers declared by the pod.
    pub containers: Vec<String>,
    /// Reported runtime state per container.
    pub container_states: BTreeMap<String, ContainerStateKind>,
}

/// Narrow cluster surface the session engine uses.
///
/// The ingress object is read-modify-written by the engine; that sequence is
/// serialized by the ingress lock at the engine layer, not here.
#[async_trait]
pub trait ClusterBackend: Send + Sync + 'static {
    /// Creates a persistent claim with the given capacity (e.g. `"10Mi"`).
    ///
    /// Returns `Error::AlreadyExists` when the claim is already present.
    async fn create_claim(&self, name: &str, capacity: &str) -> Result<()>;

    /// Deletes a persistent claim. Missing claims are success.
    async fn delete_claim(&self, name: &str) -> Result<()>;

    /// Reads claim metadata. Returns `Error::NotFound` for missing claims.
    async fn get_claim(&self, name: &str) -> Result<ClaimMeta>;

    /// Creates a deployment.
    async fn create_deployment(&self, spec: &DeploymentSpec) -> Result<()>;

    /// Deletes a deployment. Missing deployments are success.
    async fn delete_deployment(&self, name: &str) -> Result<()>;

    /// Reads deployment readiness. Returns `Error::NotFound` if absent.
    async fn get_deployment(&self, name: &str) -> Result<DeploymentStatus>;

    /// Lists pods labeled `app=<app>`.
    async fn list_pods(&self, app: &str) -> Result<Vec<PodInfo>>;

    /// Creates the front service.
    async fn create_service(&self, spec: &ServiceSpec) -> Result<()>;

    /// Deletes the front service. Missing services are success.
    async fn delete_service(&self, name: &str) -> Result<()>;

    /// Reads the shared ingress object.
    async fn get_ingress(&self, name: &str) -> Result<IngressDef>;

    /// Replaces the rules of the shared ingress object.
    async fn update_ingress(&self, ingress: &IngressDef) -> Result<()>;

    /// Opens a log stream for one container of one pod.
    async fn stream_logs(&self, pod: &str, container: &str, follow: bool) -> Result<LogStream>;
}
