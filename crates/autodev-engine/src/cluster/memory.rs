//! In-memory cluster backend for testing.
//!
//! Models just enough of the cluster to exercise the session lifecycle:
//! claims, deployments with a settable ready-replica count, a synthetic pod
//! per deployment, services, named ingress objects, and per-container log
//! buffers. Failure injection knobs let tests simulate partial `Create`
//! failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use autodev_core::{Error, Result};

use super::{
    ClaimMeta, ClusterBackend, ContainerStateKind, DeploymentSpec, DeploymentStatus, IngressDef,
    LogStream, PodInfo, ServiceSpec,
};

/// In-memory cluster backend.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    inner: RwLock<State>,
    fail_create_deployment: AtomicBool,
    fail_create_service: AtomicBool,
}

#[derive(Debug, Default)]
struct State {
    claims: BTreeMap<String, String>,
    deployments: BTreeMap<String, DeploymentSpec>,
    ready_replicas: BTreeMap<String, i32>,
    container_states: BTreeMap<String, BTreeMap<String, ContainerStateKind>>,
    services: BTreeMap<String, ServiceSpec>,
    ingresses: BTreeMap<String, IngressDef>,
    logs: BTreeMap<String, Bytes>,
}

impl MemoryCluster {
    /// Creates an empty in-memory cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty ingress object with the given name.
    ///
    /// The shared ingress pre-exists in real clusters; tests seed it here.
    pub fn seed_ingress(&self, name: &str) {
        let mut state = self.inner.write().expect("cluster lock");
        state.ingresses.insert(
            name.to_string(),
            IngressDef {
                name: name.to_string(),
                rules: Vec::new(),
            },
        );
    }

    /// Sets the observed ready-replica count of a deployment.
    pub fn set_ready_replicas(&self, deployment: &str, ready: i32) {
        let mut state = self.inner.write().expect("cluster lock");
        state.ready_replicas.insert(deployment.to_string(), ready);
    }

    /// Sets the reported runtime state of one container of a deployment's pod.
    pub fn set_container_state(&self, deployment: &str, container: &str, kind: ContainerStateKind) {
        let mut state = self.inner.write().expect("cluster lock");
        state
            .container_states
            .entry(deployment.to_string())
            .or_default()
            .insert(container.to_string(), kind);
    }

    /// Appends log bytes for one container of one pod.
    pub fn push_log(&self, pod: &str, container: &str, text: &str) {
        let mut state = self.inner.write().expect("cluster lock");
        let key = format!("{pod}/{container}");
        let mut buf = state.logs.remove(&key).map(|b| b.to_vec()).unwrap_or_default();
        buf.extend_from_slice(text.as_bytes());
        state.logs.insert(key, Bytes::from(buf));
    }

    /// Makes the next `create_deployment` calls fail with a transport error.
    pub fn inject_deployment_failure(&self, fail: bool) {
        self.fail_create_deployment.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `create_service` calls fail with a transport error.
    pub fn inject_service_failure(&self, fail: bool) {
        self.fail_create_service.store(fail, Ordering::SeqCst);
    }

    /// Names of all existing claims.
    #[must_use]
    pub fn claim_names(&self) -> Vec<String> {
        let state = self.inner.read().expect("cluster lock");
        state.claims.keys().cloned().collect()
    }

    /// Whether a deployment with the given name exists.
    #[must_use]
    pub fn has_deployment(&self, name: &str) -> bool {
        let state = self.inner.read().expect("cluster lock");
        state.deployments.contains_key(name)
    }

    /// Whether a service with the given name exists.
    #[must_use]
    pub fn has_service(&self, name: &str) -> bool {
        let state = self.inner.read().expect("cluster lock");
        state.services.contains_key(name)
    }

    /// Snapshot of a named ingress object, if present.
    #[must_use]
    pub fn ingress(&self, name: &str) -> Option<IngressDef> {
        let state = self.inner.read().expect("cluster lock");
        state.ingresses.get(name).cloned()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.inner.read().map_err(|_| Error::Internal {
            message: "cluster lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.inner.write().map_err(|_| Error::Internal {
            message: "cluster lock poisoned".into(),
        })
    }
}

fn pod_name(deployment: &str) -> String {
    format!("{deployment}-0")
}

#[async_trait]
impl ClusterBackend for MemoryCluster {
    async fn create_claim(&self, name: &str, capacity: &str) -> Result<()> {
        let mut state = self.write()?;
        if state.claims.contains_key(name) {
            return Err(Error::AlreadyExists(format!("claim {name}")));
        }
        state.claims.insert(name.to_string(), capacity.to_string());
        Ok(())
    }

    async fn delete_claim(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.claims.remove(name);
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<ClaimMeta> {
        let state = self.read()?;
        state
            .claims
            .get(name)
            .map(|capacity| ClaimMeta {
                name: name.to_string(),
                capacity: Some(capacity.clone()),
            })
            .ok_or_else(|| Error::NotFound(format!("claim {name}")))
    }

    async fn create_deployment(&self, spec: &DeploymentSpec) -> Result<()> {
        if self.fail_create_deployment.load(Ordering::SeqCst) {
            return Err(Error::transport("injected deployment failure"));
        }
        let mut state = self.write()?;
        if state.deployments.contains_key(&spec.name) {
            return Err(Error::AlreadyExists(format!("deployment {}", spec.name)));
        }
        state.deployments.insert(spec.name.clone(), spec.clone());
        state.ready_replicas.entry(spec.name.clone()).or_insert(0);
        Ok(())
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.deployments.remove(name);
        state.ready_replicas.remove(name);
        state.container_states.remove(name);
        Ok(())
    }

    async fn get_deployment(&self, name: &str) -> Result<DeploymentStatus> {
        let state = self.read()?;
        if !state.deployments.contains_key(name) {
            return Err(Error::NotFound(format!("deployment {name}")));
        }
        Ok(DeploymentStatus {
            ready_replicas: state.ready_replicas.get(name).copied().unwrap_or(0),
        })
    }

    async fn list_pods(&self, app: &str) -> Result<Vec<PodInfo>> {
        let state = self.read()?;
        Ok(state
            .deployments
            .values()
            .filter(|d| d.labels.get("app").is_some_and(|label| label == app))
            .map(|d| {
                let overrides = state.container_states.get(&d.name);
                let container_states = d
                    .containers
                    .iter()
                    .map(|c| {
                        let kind = overrides
                            .and_then(|m| m.get(&c.name).copied())
                            .unwrap_or(ContainerStateKind::Waiting);
                        (c.name.clone(), kind)
                    })
                    .collect();
                PodInfo {
                    name: pod_name(&d.name),
                    containers: d.containers.iter().map(|c| c.name.clone()).collect(),
                    container_states,
                }
            })
            .collect())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        if self.fail_create_service.load(Ordering::SeqCst) {
            return Err(Error::transport("injected service failure"));
        }
        let mut state = self.write()?;
        if state.services.contains_key(&spec.name) {
            return Err(Error::AlreadyExists(format!("service {}", spec.name)));
        }
        state.services.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.services.remove(name);
        Ok(())
    }

    async fn get_ingress(&self, name: &str) -> Result<IngressDef> {
        let state = self.read()?;
        state
            .ingresses
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("ingress {name}")))
    }

    async fn update_ingress(&self, ingress: &IngressDef) -> Result<()> {
        let mut state = self.write()?;
        if !state.ingresses.contains_key(&ingress.name) {
            return Err(Error::NotFound(format!("ingress {}", ingress.name)));
        }
        state.ingresses.insert(ingress.name.clone(), ingress.clone());
        Ok(())
    }

    async fn stream_logs(&self, pod: &str, container: &str, _follow: bool) -> Result<LogStream> {
        let state = self.read()?;
        let bytes = state
            .logs
            .get(&format!("{pod}/{container}"))
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(std::io::Cursor::new(bytes.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claims_roundtrip() {
        let cluster = MemoryCluster::new();
        cluster.create_claim("session-a", "10Mi").await.unwrap();
        assert!(matches!(
            cluster.create_claim("session-a", "10Mi").await,
            Err(Error::AlreadyExists(_))
        ));

        let meta = cluster.get_claim("session-a").await.unwrap();
        assert_eq!(meta.capacity.as_deref(), Some("10Mi"));

        cluster.delete_claim("session-a").await.unwrap();
        assert!(cluster.get_claim("session-a").await.unwrap_err().is_not_found());
        // idempotent
        cluster.delete_claim("session-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_pods_follow_deployment() {
        let cluster = MemoryCluster::new();
        let spec = DeploymentSpec {
            name: "session-a".into(),
            labels: [("app".to_string(), "session-a".to_string())].into(),
            replicas: 1,
            containers: vec![super::super::ContainerSpec {
                name: "ide".into(),
                image: "linuxserver/code-server".into(),
                port: 8443,
                env: vec![],
                volume_mounts: vec![],
            }],
            volumes: vec![],
        };
        cluster.create_deployment(&spec).await.unwrap();

        let pods = cluster.list_pods("session-a").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].containers, vec!["ide".to_string()]);
        assert_eq!(
            pods[0].container_states["ide"],
            ContainerStateKind::Waiting
        );

        cluster.set_container_state("session-a", "ide", ContainerStateKind::Running);
        let pods = cluster.list_pods("session-a").await.unwrap();
        assert_eq!(
            pods[0].container_states["ide"],
            ContainerStateKind::Running
        );

        cluster.delete_deployment("session-a").await.unwrap();
        assert!(cluster.list_pods("session-a").await.unwrap().is_empty());
    }
}
