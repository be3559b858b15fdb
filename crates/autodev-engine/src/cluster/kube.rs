//! Kubernetes implementation of the cluster adapter.
//!
//! Resolves the client the same way the cluster CLI does: in-cluster service
//! account when running inside the cluster, kubeconfig otherwise. All objects
//! live in a single configured namespace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as netv1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;

use autodev_core::{Error, Result};

use super::{
    ClaimMeta, ClusterBackend, ContainerSpec, ContainerStateKind, DeploymentSpec,
    DeploymentStatus, IngressDef, IngressRule, LogStream, PodInfo, ServiceSpec,
};

/// Cluster adapter backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Connects using in-cluster config when available, kubeconfig otherwise.
    ///
    /// # Errors
    ///
    /// Returns a transport error when neither configuration source yields a
    /// working client.
    pub async fn connect(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::transport_with_source("failed to build cluster client", e))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn claims(&self) -> Api<corev1::PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<appsv1::Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<corev1::Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<corev1::Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn ingresses(&self) -> Api<netv1::Ingress> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            ..ObjectMeta::default()
        }
    }
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn kube_err(op: &str, what: &str, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(what.to_string()),
        kube::Error::Api(ae) if ae.code == 409 => Error::AlreadyExists(what.to_string()),
        e => Error::transport_with_source(format!("cluster {op} failed for {what}"), e),
    }
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) | Err(Error::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn to_container(spec: &ContainerSpec) -> corev1::Container {
    corev1::Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        ports: Some(vec![corev1::ContainerPort {
            container_port: spec.port,
            ..corev1::ContainerPort::default()
        }]),
        env: (!spec.env.is_empty()).then(|| {
            spec.env
                .iter()
                .map(|env| corev1::EnvVar {
                    name: env.name.clone(),
                    value: Some(env.value.clone()),
                    ..corev1::EnvVar::default()
                })
                .collect()
        }),
        volume_mounts: (!spec.volume_mounts.is_empty()).then(|| {
            spec.volume_mounts
                .iter()
                .map(|mount| corev1::VolumeMount {
                    name: mount.name.clone(),
                    mount_path: mount.mount_path.clone(),
                    ..corev1::VolumeMount::default()
                })
                .collect()
        }),
        ..corev1::Container::default()
    }
}

fn container_state(status: &corev1::ContainerStatus) -> ContainerStateKind {
    match &status.state {
        Some(state) if state.running.is_some() => ContainerStateKind::Running,
        Some(state) if state.terminated.is_some() => ContainerStateKind::Terminated,
        _ => ContainerStateKind::Waiting,
    }
}

#[async_trait]
impl ClusterBackend for KubeCluster {
    async fn create_claim(&self, name: &str, capacity: &str) -> Result<()> {
        let claim = corev1::PersistentVolumeClaim {
            metadata: self.metadata(name),
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(corev1::ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(capacity.to_string()),
                    )])),
                    ..corev1::ResourceRequirements::default()
                }),
                ..corev1::PersistentVolumeClaimSpec::default()
            }),
            ..corev1::PersistentVolumeClaim::default()
        };
        self.claims()
            .create(&PostParams::default(), &claim)
            .await
            .map(|_| ())
            .map_err(|e| kube_err("create claim", name, e))
    }

    async fn delete_claim(&self, name: &str) -> Result<()> {
        ignore_not_found(
            self.claims()
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| kube_err("delete claim", name, e)),
        )
    }

    async fn get_claim(&self, name: &str) -> Result<ClaimMeta> {
        let claim = self
            .claims()
            .get(name)
            .await
            .map_err(|e| kube_err("get claim", name, e))?;
        let capacity = claim
            .spec
            .and_then(|spec| spec.resources)
            .and_then(|resources| resources.requests)
            .and_then(|requests| requests.get("storage").map(|q| q.0.clone()));
        Ok(ClaimMeta {
            name: name.to_string(),
            capacity,
        })
    }

    async fn create_deployment(&self, spec: &DeploymentSpec) -> Result<()> {
        let labels = spec.labels.clone();
        let deployment = appsv1::Deployment {
            metadata: self.metadata(&spec.name),
            spec: Some(appsv1::DeploymentSpec {
                replicas: Some(spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..LabelSelector::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: spec.containers.iter().map(to_container).collect(),
                        volumes: (!spec.volumes.is_empty()).then(|| {
                            spec.volumes
                                .iter()
                                .map(|volume| corev1::Volume {
                                    name: volume.name.clone(),
                                    persistent_volume_claim: Some(
                                        corev1::PersistentVolumeClaimVolumeSource {
                                            claim_name: volume.claim.clone(),
                                            read_only: None,
                                        },
                                    ),
                                    ..corev1::Volume::default()
                                })
                                .collect()
                        }),
                        ..corev1::PodSpec::default()
                    }),
                },
                ..appsv1::DeploymentSpec::default()
            }),
            ..appsv1::Deployment::default()
        };
        self.deployments()
            .create(&PostParams::default(), &deployment)
            .await
            .map(|_| ())
            .map_err(|e| kube_err("create deployment", &spec.name, e))
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        ignore_not_found(
            self.deployments()
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| kube_err("delete deployment", name, e)),
        )
    }

    async fn get_deployment(&self, name: &str) -> Result<DeploymentStatus> {
        let deployment = self
            .deployments()
            .get(name)
            .await
            .map_err(|e| kube_err("get deployment", name, e))?;
        Ok(DeploymentStatus {
            ready_replicas: deployment
                .status
                .and_then(|status| status.ready_replicas)
                .unwrap_or(0),
        })
    }

    async fn list_pods(&self, app: &str) -> Result<Vec<PodInfo>> {
        let params = ListParams::default().labels(&format!("app={app}"));
        let pods = self
            .pods()
            .list(&params)
            .await
            .map_err(|e| kube_err("list pods", app, e))?;

        Ok(pods
            .items
            .into_iter()
            .map(|pod| {
                let name = pod.metadata.name.unwrap_or_default();
                let containers = pod
                    .spec
                    .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default();
                let container_states = pod
                    .status
                    .and_then(|status| status.container_statuses)
                    .unwrap_or_default()
                    .iter()
                    .map(|status| (status.name.clone(), container_state(status)))
                    .collect();
                PodInfo {
                    name,
                    containers,
                    container_states,
                }
            })
            .collect())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        let service = corev1::Service {
            metadata: self.metadata(&spec.name),
            spec: Some(corev1::ServiceSpec {
                selector: Some(spec.selector.clone()),
                ports: Some(
                    spec.ports
                        .iter()
                        .map(|port| corev1::ServicePort {
                            name: Some(port.name.clone()),
                            port: port.port,
                            target_port: Some(IntOrString::Int(port.target_port)),
                            ..corev1::ServicePort::default()
                        })
                        .collect(),
                ),
                type_: Some("ClusterIP".to_string()),
                ..corev1::ServiceSpec::default()
            }),
            ..corev1::Service::default()
        };
        self.services()
            .create(&PostParams::default(), &service)
            .await
            .map(|_| ())
            .map_err(|e| kube_err("create service", &spec.name, e))
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        ignore_not_found(
            self.services()
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| kube_err("delete service", name, e)),
        )
    }

    async fn get_ingress(&self, name: &str) -> Result<IngressDef> {
        let ingress = self
            .ingresses()
            .get(name)
            .await
            .map_err(|e| kube_err("get ingress", name, e))?;

        let mut rules = Vec::new();
        for rule in ingress.spec.and_then(|spec| spec.rules).unwrap_or_default() {
            let host = rule.host.unwrap_or_default();
            for path in rule.http.map(|http| http.paths).unwrap_or_default() {
                if let Some(backend) = path.backend.service {
                    rules.push(IngressRule {
                        host: host.clone(),
                        service: backend.name,
                        service_port: backend.port.and_then(|p| p.number).unwrap_or_default(),
                    });
                }
            }
        }
        Ok(IngressDef {
            name: name.to_string(),
            rules,
        })
    }

    async fn update_ingress(&self, ingress: &IngressDef) -> Result<()> {
        let api = self.ingresses();
        // Read the live object so annotations and resource version are kept;
        // only the rule list is replaced. The engine serializes this
        // read-modify-write under the ingress lock.
        let mut live = api
            .get(&ingress.name)
            .await
            .map_err(|e| kube_err("get ingress", &ingress.name, e))?;

        let rules: Vec<netv1::IngressRule> = ingress
            .rules
            .iter()
            .map(|rule| netv1::IngressRule {
                host: Some(rule.host.clone()),
                http: Some(netv1::HTTPIngressRuleValue {
                    paths: vec![netv1::HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: netv1::IngressBackend {
                            service: Some(netv1::IngressServiceBackend {
                                name: rule.service.clone(),
                                port: Some(netv1::ServiceBackendPort {
                                    number: Some(rule.service_port),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            })
            .collect();

        let spec = live.spec.get_or_insert_with(netv1::IngressSpec::default);
        spec.rules = if rules.is_empty() { None } else { Some(rules) };

        api.replace(&ingress.name, &PostParams::default(), &live)
            .await
            .map(|_| ())
            .map_err(|e| kube_err("update ingress", &ingress.name, e))
    }

    async fn stream_logs(&self, pod: &str, container: &str, follow: bool) -> Result<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow,
            ..LogParams::default()
        };
        let stream = self
            .pods()
            .log_stream(pod, &params)
            .await
            .map_err(|e| kube_err("stream logs", pod, e))?;
        use tokio_util::compat::FuturesAsyncReadCompatExt;
        Ok(Box::pin(stream.compat()))
    }
}
