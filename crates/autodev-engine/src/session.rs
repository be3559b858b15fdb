//! Session lifecycle state machine.
//!
//! A session's record in the consistent KV is the single source of truth for
//! its declared composition; the cluster is the source of truth for runtime
//! readiness. The record is either the sentinel `"{}"` (initialized, not yet
//! populated) or a serialized [`SessionInfo`].
//!
//! State transitions couple the KV record, the cluster objects (claims,
//! deployment, front service, ingress rules), and the declared component
//! list. Callers must hold the per-session lock around every mutating
//! operation, and additionally the ingress lock (session first, ingress
//! second) around [`SessionEngine::create`] and [`SessionEngine::delete`],
//! which read-modify-write the shared ingress object.
//!
//! `create` runs as a saga: claims → deployment → service → ingress rules →
//! record, each step registering a compensation, so a forward failure undoes
//! the committed steps in reverse order. `delete` remains fully defensive
//! (every per-resource delete tolerates absence) so partial states left by a
//! crash are still cleaned on the next delete attempt.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use autodev_core::saga::{compensation, Saga, SagaContext, StepOutput};
use autodev_core::{Error as CoreError, KvStore};

use crate::cluster::{
    ClusterBackend, ContainerSpec, ContainerStateKind, DeploymentSpec, IngressRule, LogStream,
    ServicePort, ServiceSpec, VolumeRef,
};
use crate::components::{render_components, Component, ComponentState};
use crate::error::{Result, SessionError};

/// Record value of a session that has been initialized but not populated.
pub const EMPTY_RECORD: &str = "{}";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Components created, deployment not yet observed ready.
    Initialized,
    /// Deployment observed ready.
    Running,
    /// Deployment deleted, storage retained.
    Stopped,
}

/// The persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Lifecycle state.
    pub session_state: SessionState,
    /// Declared components, with URLs populated for exposed ones.
    pub components: Vec<Component>,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// External base domain published hostnames are built under.
    pub base_domain: String,
    /// Name of the shared ingress object.
    pub ingress_name: String,
    /// Capacity of the per-session claim created by `init`.
    pub session_claim_capacity: String,
    /// Capacity of claims created for component volumes.
    pub component_claim_capacity: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_domain: "localtest.me".to_string(),
            ingress_name: "minimal-ingress".to_string(),
            session_claim_capacity: "10Mi".to_string(),
            component_claim_capacity: "20Mi".to_string(),
        }
    }
}

enum RecordState {
    Empty,
    Populated(SessionInfo),
}

/// Keys of forward-step side-channels in the create saga's context.
mod ctx_keys {
    pub const COMPONENTS: &str = "components";
    pub const CREATED_CLAIMS: &str = "createdClaims";
}

/// The session lifecycle engine.
pub struct SessionEngine {
    kv: Arc<dyn KvStore>,
    cluster: Arc<dyn ClusterBackend>,
    config: EngineConfig,
}

impl SessionEngine {
    /// Creates an engine over the given KV and cluster backends.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, cluster: Arc<dyn ClusterBackend>, config: EngineConfig) -> Self {
        Self {
            kv,
            cluster,
            config,
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Initializes a session: writes the `"{}"` record and creates the
    /// per-session claim.
    ///
    /// Re-initializing an existing session is a success no-op.
    ///
    /// # Errors
    ///
    /// Any KV failure other than "key absent" is surfaced as transport.
    pub async fn init(&self, session_id: &str) -> Result<()> {
        match self.kv.get(session_id).await {
            Ok(_) => {
                tracing::info!(session = session_id, "session already initialized");
                Ok(())
            }
            Err(CoreError::NotFound(_)) => {
                tracing::info!(session = session_id, "initializing session");
                self.kv
                    .put(session_id, Bytes::from_static(EMPTY_RECORD.as_bytes()))
                    .await?;
                match self
                    .cluster
                    .create_claim(session_id, &self.config.session_claim_capacity)
                    .await
                {
                    Ok(()) | Err(CoreError::AlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Populates an initialized-empty session: creates component claims, the
    /// deployment, the front service, and the ingress rules, then persists
    /// the record.
    ///
    /// Runs as a saga: a failing step undoes everything the earlier steps
    /// created, in reverse order.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyPopulated` unless the record is exactly `"{}"`.
    pub async fn create(
        &self,
        session_id: &str,
        components: Vec<Component>,
    ) -> Result<SessionInfo> {
        match self.read_record(session_id).await? {
            RecordState::Empty => {}
            RecordState::Populated(_) => {
                return Err(SessionError::AlreadyPopulated {
                    session_id: session_id.to_string(),
                })
            }
        }

        let (containers, volumes) = render_components(&components, session_id)?;
        let session = session_id.to_string();

        let mut ctx = SagaContext::new();
        ctx.insert(ctx_keys::COMPONENTS, &components)?;

        let claims_step = {
            let cluster = Arc::clone(&self.cluster);
            let capacity = self.config.component_claim_capacity.clone();
            let session = session.clone();
            let volumes = volumes.clone();
            move |mut ctx: SagaContext| async move {
                let mut created: Vec<String> = Vec::new();
                for volume in volumes.iter().filter(|v| v.claim != session) {
                    match cluster.create_claim(&volume.claim, &capacity).await {
                        Ok(()) => {
                            tracing::info!(session = %session, claim = %volume.claim, "created claim");
                            created.push(volume.claim.clone());
                        }
                        // Shared claims are created on demand and may pre-exist.
                        Err(CoreError::AlreadyExists(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                ctx.insert(ctx_keys::CREATED_CLAIMS, &created)?;
                let comp = compensation({
                    let cluster = Arc::clone(&cluster);
                    move |ctx: SagaContext| async move {
                        let created: Vec<String> =
                            ctx.get(ctx_keys::CREATED_CLAIMS)?.unwrap_or_default();
                        for claim in created {
                            if let Err(e) = cluster.delete_claim(&claim).await {
                                tracing::warn!(claim = %claim, error = %e, "claim compensation failed");
                            }
                        }
                        Ok(())
                    }
                });
                Ok(StepOutput::with_compensation(ctx, comp))
            }
        };

        let deployment_step = {
            let cluster = Arc::clone(&self.cluster);
            let spec = deployment_spec(&session, containers, volumes);
            move |ctx: SagaContext| async move {
                cluster.create_deployment(&spec).await?;
                tracing::info!(session = %spec.name, "created deployment");
                let comp = compensation({
                    let cluster = Arc::clone(&cluster);
                    let name = spec.name.clone();
                    move |_ctx: SagaContext| async move { cluster.delete_deployment(&name).await }
                });
                Ok(StepOutput::with_compensation(ctx, comp))
            }
        };

        let service_step = {
            let cluster = Arc::clone(&self.cluster);
            let spec = service_spec(&session, &components);
            move |ctx: SagaContext| async move {
                cluster.create_service(&spec).await?;
                tracing::info!(session = %spec.name, "created service");
                let comp = compensation({
                    let cluster = Arc::clone(&cluster);
                    let name = spec.name.clone();
                    move |_ctx: SagaContext| async move { cluster.delete_service(&name).await }
                });
                Ok(StepOutput::with_compensation(ctx, comp))
            }
        };

        let ingress_step = {
            let cluster = Arc::clone(&self.cluster);
            let ingress_name = self.config.ingress_name.clone();
            let base_domain = self.config.base_domain.clone();
            let session = session.clone();
            move |mut ctx: SagaContext| async move {
                let mut ingress = cluster.get_ingress(&ingress_name).await?;
                let mut components: Vec<Component> = ctx
                    .get(ctx_keys::COMPONENTS)?
                    .ok_or_else(|| CoreError::Internal {
                        message: "saga context missing components".into(),
                    })?;
                for component in components.iter_mut().filter(|c| c.expose_component) {
                    let host = format!("{session}.{}.{base_domain}", component.component_id);
                    component.component_metadata.url = host.clone();
                    ingress.rules.push(IngressRule {
                        host,
                        service: session.clone(),
                        service_port: component.public_port(),
                    });
                }
                cluster.update_ingress(&ingress).await?;
                tracing::info!(session = %session, ingress = %ingress_name, "published ingress rules");
                ctx.insert(ctx_keys::COMPONENTS, &components)?;

                let comp = compensation({
                    let cluster = Arc::clone(&cluster);
                    let ingress_name = ingress_name.clone();
                    let prefix = format!("{session}.");
                    move |_ctx: SagaContext| async move {
                        let mut ingress = cluster.get_ingress(&ingress_name).await?;
                        ingress.rules.retain(|rule| !rule.host.starts_with(&prefix));
                        cluster.update_ingress(&ingress).await
                    }
                });
                Ok(StepOutput::with_compensation(ctx, comp))
            }
        };

        let record_step = {
            let kv = Arc::clone(&self.kv);
            let session = session.clone();
            move |ctx: SagaContext| async move {
                let components: Vec<Component> = ctx
                    .get(ctx_keys::COMPONENTS)?
                    .ok_or_else(|| CoreError::Internal {
                        message: "saga context missing components".into(),
                    })?;
                let info = SessionInfo {
                    session_state: SessionState::Initialized,
                    components,
                };
                let encoded = serde_json::to_vec(&info).map_err(CoreError::serialization)?;
                kv.put(&session, Bytes::from(encoded)).await?;
                Ok(StepOutput::committed(ctx))
            }
        };

        let ctx = Saga::new("create-session")
            .step("create-claims", claims_step)
            .step("create-deployment", deployment_step)
            .step("create-service", service_step)
            .step("publish-ingress-rules", ingress_step)
            .step("persist-record", record_step)
            .run(ctx)
            .await?;

        let components: Vec<Component> =
            ctx.get(ctx_keys::COMPONENTS)?
                .ok_or_else(|| CoreError::Internal {
                    message: "saga context missing components".into(),
                })?;
        Ok(SessionInfo {
            session_state: SessionState::Initialized,
            components,
        })
    }

    /// Reconciles the stored state with observed cluster state.
    ///
    /// `Initialized` becomes `Running` once the deployment reports one ready
    /// replica. A `Running` or `Stopped` session whose backing claims have
    /// disappeared is purged (the record is deleted and `None` returned); the
    /// service and ingress rules are left for `delete`, which holds the
    /// ingress lock.
    ///
    /// # Errors
    ///
    /// Fails with `StillInitializing` while the record is `"{}"`.
    pub async fn refresh(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let info = match self.read_record(session_id).await? {
            RecordState::Empty => {
                return Err(SessionError::StillInitializing {
                    session_id: session_id.to_string(),
                })
            }
            RecordState::Populated(info) => info,
        };

        match info.session_state {
            SessionState::Initialized => {
                let status = self.cluster.get_deployment(session_id).await?;
                if status.ready_replicas == 1 {
                    let mut info = info;
                    info.session_state = SessionState::Running;
                    self.write_record(session_id, &info).await?;
                    tracing::info!(session = session_id, "session is running");
                    Ok(Some(info))
                } else {
                    Ok(Some(info))
                }
            }
            SessionState::Running => {
                let status = self.cluster.get_deployment(session_id).await?;
                if status.ready_replicas == 1 {
                    Ok(Some(info))
                } else {
                    self.purge_if_claims_missing(session_id, info).await
                }
            }
            SessionState::Stopped => self.purge_if_claims_missing(session_id, info).await,
        }
    }

    /// Toggles a session between `Running` and `Stopped`.
    ///
    /// # Errors
    ///
    /// Refuses with `StillInitializing` unless the session is `Running` or
    /// `Stopped`.
    pub async fn toggle(&self, session_id: &str) -> Result<SessionInfo> {
        let mut info = match self.read_record(session_id).await? {
            RecordState::Empty => {
                return Err(SessionError::StillInitializing {
                    session_id: session_id.to_string(),
                })
            }
            RecordState::Populated(info) => info,
        };

        match info.session_state {
            SessionState::Running => {
                self.cluster.delete_deployment(session_id).await?;
                info.session_state = SessionState::Stopped;
                self.write_record(session_id, &info).await?;
                tracing::info!(session = session_id, "session stopped");
                Ok(info)
            }
            SessionState::Stopped => {
                let (containers, volumes) = render_components(&info.components, session_id)?;
                self.cluster
                    .create_deployment(&deployment_spec(session_id, containers, volumes))
                    .await?;
                info.session_state = SessionState::Running;
                self.write_record(session_id, &info).await?;
                tracing::info!(session = session_id, "session started");
                Ok(info)
            }
            SessionState::Initialized => Err(SessionError::StillInitializing {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Destroys every derived object of a session and deletes its record.
    ///
    /// Every per-resource delete tolerates absence, so this also cleans up
    /// partial states left behind by interrupted creates.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when no record exists.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        // The deployment may already be gone (Stopped sessions, partial creates).
        if let Err(e) = self.cluster.delete_deployment(session_id).await {
            tracing::debug!(session = session_id, error = %e, "deployment delete failed, continuing");
        }

        let raw = match self.kv.get(session_id).await {
            Ok(raw) => raw,
            Err(CoreError::NotFound(_)) => {
                return Err(SessionError::NotFound {
                    session_id: session_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        // The session claim from init is deleted in both branches; a
        // populated record additionally drops every rendered volume's claim.
        if raw.as_ref() == EMPTY_RECORD.as_bytes() {
            self.cluster.delete_claim(session_id).await?;
        } else {
            let info: SessionInfo = serde_json::from_slice(&raw)
                .map_err(|e| SessionError::Core(CoreError::serialization(e)))?;
            let (_, volumes) = render_components(&info.components, session_id)?;
            let mut claims: Vec<&str> = vec![session_id];
            claims.extend(
                volumes
                    .iter()
                    .map(|v| v.claim.as_str())
                    .filter(|claim| *claim != session_id),
            );
            for claim in claims {
                self.cluster.delete_claim(claim).await?;
                tracing::info!(session = session_id, claim = claim, "deleted claim");
            }
        }

        self.cluster.delete_service(session_id).await?;

        let mut ingress = self.cluster.get_ingress(&self.config.ingress_name).await?;
        let prefix = format!("{session_id}.");
        ingress.rules.retain(|rule| !rule.host.starts_with(&prefix));
        self.cluster.update_ingress(&ingress).await?;

        self.kv.delete(session_id).await?;
        tracing::info!(session = session_id, "session deleted");
        Ok(())
    }

    /// Projects the per-container runtime status of the session's pod.
    ///
    /// Returns an empty map while pods have not materialized yet.
    ///
    /// # Errors
    ///
    /// Fails when the deployment is missing or more than one pod matches.
    pub async fn container_statuses(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, ComponentState>> {
        self.cluster.get_deployment(session_id).await?;
        let pods = self.cluster.list_pods(session_id).await?;

        let pod = match pods.as_slice() {
            [] => return Ok(BTreeMap::new()),
            [pod] => pod,
            many => {
                return Err(SessionError::AmbiguousPods {
                    session_id: session_id.to_string(),
                    count: many.len(),
                })
            }
        };

        Ok(pod
            .container_states
            .iter()
            .map(|(name, kind)| {
                let state = match kind {
                    ContainerStateKind::Running => ComponentState::Ready,
                    ContainerStateKind::Terminated => ComponentState::Terminated,
                    ContainerStateKind::Waiting => ComponentState::Initializing,
                };
                (name.clone(), state)
            })
            .collect())
    }

    /// Opens a follow-log stream for one component. The caller owns closing.
    ///
    /// # Errors
    ///
    /// Fails when no pod exists, more than one pod matches, or the component
    /// is not a container of the pod.
    pub async fn logs(&self, session_id: &str, component_id: &str) -> Result<LogStream> {
        let pods = self.cluster.list_pods(session_id).await?;
        let pod = match pods.as_slice() {
            [] => {
                return Err(SessionError::NoPods {
                    session_id: session_id.to_string(),
                })
            }
            [pod] => pod,
            many => {
                return Err(SessionError::AmbiguousPods {
                    session_id: session_id.to_string(),
                    count: many.len(),
                })
            }
        };

        if !pod.containers.iter().any(|name| name == component_id) {
            return Err(SessionError::ComponentNotFound {
                session_id: session_id.to_string(),
                component_id: component_id.to_string(),
            });
        }

        Ok(self.cluster.stream_logs(&pod.name, component_id, true).await?)
    }

    async fn read_record(&self, session_id: &str) -> Result<RecordState> {
        let raw = match self.kv.get(session_id).await {
            Ok(raw) => raw,
            Err(CoreError::NotFound(_)) => {
                return Err(SessionError::NotFound {
                    session_id: session_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if raw.as_ref() == EMPTY_RECORD.as_bytes() {
            return Ok(RecordState::Empty);
        }
        let info: SessionInfo = serde_json::from_slice(&raw)
            .map_err(|e| SessionError::Core(CoreError::serialization(e)))?;
        Ok(RecordState::Populated(info))
    }

    async fn write_record(&self, session_id: &str, info: &SessionInfo) -> Result<()> {
        let encoded =
            serde_json::to_vec(info).map_err(|e| SessionError::Core(CoreError::serialization(e)))?;
        self.kv.put(session_id, Bytes::from(encoded)).await?;
        Ok(())
    }

    async fn purge_if_claims_missing(
        &self,
        session_id: &str,
        info: SessionInfo,
    ) -> Result<Option<SessionInfo>> {
        let (_, volumes) = render_components(&info.components, session_id)?;
        for volume in &volumes {
            match self.cluster.get_claim(&volume.claim).await {
                Ok(_) => {}
                Err(CoreError::NotFound(_)) => {
                    // Backing storage is gone, so the record is stale. The
                    // service and ingress rules are left for delete, which
                    // holds the ingress lock.
                    tracing::warn!(
                        session = session_id,
                        claim = %volume.claim,
                        "claim missing, purging stale session record"
                    );
                    self.kv.delete(session_id).await?;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(info))
    }
}

fn deployment_spec(
    session_id: &str,
    containers: Vec<ContainerSpec>,
    volumes: Vec<VolumeRef>,
) -> DeploymentSpec {
    DeploymentSpec {
        name: session_id.to_string(),
        labels: BTreeMap::from([("app".to_string(), session_id.to_string())]),
        replicas: 1,
        containers,
        volumes,
    }
}

fn service_spec(session_id: &str, components: &[Component]) -> ServiceSpec {
    ServiceSpec {
        name: session_id.to_string(),
        selector: BTreeMap::from([("app".to_string(), session_id.to_string())]),
        ports: components
            .iter()
            .filter(|c| c.expose_component)
            .map(|c| ServicePort {
                name: c.component_id.clone(),
                port: c.public_port(),
                target_port: c.public_port(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_not_a_session_info() {
        // "{}" must stay distinguishable from a serialized record.
        assert!(serde_json::from_str::<SessionInfo>(EMPTY_RECORD).is_err());
    }

    #[test]
    fn test_session_info_wire_shape() {
        let info = SessionInfo {
            session_state: SessionState::Initialized,
            components: Vec::new(),
        };
        let encoded = serde_json::to_value(&info).unwrap();
        assert_eq!(encoded["sessionState"], "initialized");
        assert!(encoded["components"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_service_spec_publishes_exposed_ports_only() {
        use crate::components::{ComponentMetadata, ComponentType};

        let components = vec![
            Component {
                component_type: ComponentType::Code,
                component_id: "ide".into(),
                expose_component: true,
                component_metadata: ComponentMetadata::default(),
            },
            Component {
                component_type: ComponentType::KvStore,
                component_id: "kv".into(),
                expose_component: false,
                component_metadata: ComponentMetadata::default(),
            },
        ];
        let spec = service_spec("session-abc", &components);
        assert_eq!(spec.ports.len(), 1);
        assert_eq!(spec.ports[0].name, "ide");
        assert_eq!(spec.ports[0].port, 8443);
    }
}
