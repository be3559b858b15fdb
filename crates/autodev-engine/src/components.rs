//! Component catalog: the pure mapping from declared components to container
//! specs, volume requirements, and public ports.
//!
//! A session declares an ordered list of [`Component`]s. Each known
//! [`ComponentType`] renders to exactly one container and at most one volume
//! reference:
//!
//! | Type | Image | Public port | Volume |
//! |---|---|---|---|
//! | `code` | `linuxserver/code-server` | 8443 | the session's own claim |
//! | `kvstore` | `redis:latest` | 6379 | shared claim `kv-data` |
//! | `docstore` | `mongo:latest` | 27017 | shared claim `doc-data` |
//!
//! Shared claims outlive any single session by design: concurrent sessions
//! declaring the same store type share storage.

use serde::{Deserialize, Serialize};

use crate::cluster::{ContainerSpec, EnvVar, VolumeMount, VolumeRef};
use crate::error::{Result, SessionError};

/// Shared claim backing every `kvstore` component.
pub const KV_CLAIM: &str = "kv-data";
/// Shared claim backing every `docstore` component.
pub const DOC_CLAIM: &str = "doc-data";
/// Mount point of the session claim inside the editor container.
const CODE_WORKSPACE: &str = "/config/workspace";

/// Closed set of component kinds a session may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// Browser-based code editor.
    Code,
    /// Key-value store.
    KvStore,
    /// Document store.
    DocStore,
    /// Anything else; renders to an error.
    #[serde(other)]
    Unknown,
}

/// Derived runtime state of a component, projected from its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    /// The container has not started yet.
    Initializing,
    /// The container is running.
    Ready,
    /// The container has terminated.
    Terminated,
}

/// Free-form component metadata.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMetadata {
    /// Secret password for the editor; injected as an environment variable.
    #[serde(default)]
    pub password: String,
    /// Public hostname, populated once the component is exposed.
    #[serde(default)]
    pub url: String,
}

impl std::fmt::Debug for ComponentMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentMetadata")
            .field("password", &"[REDACTED]")
            .field("url", &self.url)
            .finish()
    }
}

/// A declared service within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component kind.
    pub component_type: ComponentType,
    /// Opaque ID, unique within the session; doubles as the container name.
    #[serde(rename = "componentID")]
    pub component_id: String,
    /// Whether to publish a hostname for this component.
    #[serde(default)]
    pub expose_component: bool,
    /// Free-form metadata.
    #[serde(default)]
    pub component_metadata: ComponentMetadata,
}

impl Component {
    /// Returns the port the component serves on.
    #[must_use]
    pub fn public_port(&self) -> i32 {
        match self.component_type {
            ComponentType::Code => 8443,
            ComponentType::KvStore => 6379,
            ComponentType::DocStore => 27017,
            ComponentType::Unknown => 8080,
        }
    }

    /// Renders the component into a container spec plus at most one volume
    /// reference, scoped to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnsupportedComponent` for unknown types.
    pub fn render(&self, session_id: &str) -> Result<(ContainerSpec, Option<VolumeRef>)> {
        match self.component_type {
            ComponentType::Code => Ok((
                ContainerSpec {
                    name: self.component_id.clone(),
                    image: "linuxserver/code-server".to_string(),
                    port: self.public_port(),
                    env: vec![
                        EnvVar {
                            name: "PUID".into(),
                            value: "1000".into(),
                        },
                        EnvVar {
                            name: "PGID".into(),
                            value: "1000".into(),
                        },
                        EnvVar {
                            name: "TZ".into(),
                            value: "Etc/UTC".into(),
                        },
                        EnvVar {
                            name: "PASSWORD".into(),
                            value: self.component_metadata.password.clone(),
                        },
                        EnvVar {
                            name: "SUDO_PASSWORD".into(),
                            value: "password".into(),
                        },
                    ],
                    volume_mounts: vec![VolumeMount {
                        name: session_id.to_string(),
                        mount_path: CODE_WORKSPACE.to_string(),
                    }],
                },
                Some(VolumeRef {
                    name: session_id.to_string(),
                    claim: session_id.to_string(),
                }),
            )),
            ComponentType::KvStore => Ok((
                ContainerSpec {
                    name: self.component_id.clone(),
                    image: "redis:latest".to_string(),
                    port: self.public_port(),
                    env: Vec::new(),
                    volume_mounts: vec![VolumeMount {
                        name: KV_CLAIM.to_string(),
                        mount_path: "/data".to_string(),
                    }],
                },
                Some(VolumeRef {
                    name: KV_CLAIM.to_string(),
                    claim: KV_CLAIM.to_string(),
                }),
            )),
            ComponentType::DocStore => Ok((
                ContainerSpec {
                    name: self.component_id.clone(),
                    image: "mongo:latest".to_string(),
                    port: self.public_port(),
                    env: Vec::new(),
                    volume_mounts: vec![VolumeMount {
                        name: DOC_CLAIM.to_string(),
                        mount_path: "/data/db".to_string(),
                    }],
                },
                Some(VolumeRef {
                    name: DOC_CLAIM.to_string(),
                    claim: DOC_CLAIM.to_string(),
                }),
            )),
            ComponentType::Unknown => Err(SessionError::UnsupportedComponent {
                kind: "unknown".to_string(),
            }),
        }
    }
}

/// Renders every component of a session, deduplicating volumes by name.
///
/// The deployment needs one volume per *distinct* claim even when several
/// components reference the same shared claim.
///
/// # Errors
///
/// Fails on the first unsupported component.
pub fn render_components(
    components: &[Component],
    session_id: &str,
) -> Result<(Vec<ContainerSpec>, Vec<VolumeRef>)> {
    let mut containers = Vec::with_capacity(components.len());
    let mut volumes: Vec<VolumeRef> = Vec::new();
    for component in components {
        let (container, volume) = component.render(session_id)?;
        containers.push(container);
        if let Some(volume) = volume {
            if !volumes.iter().any(|existing| existing.name == volume.name) {
                volumes.push(volume);
            }
        }
    }
    Ok((containers, volumes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(kind: ComponentType, id: &str) -> Component {
        Component {
            component_type: kind,
            component_id: id.to_string(),
            expose_component: false,
            component_metadata: ComponentMetadata::default(),
        }
    }

    #[test]
    fn test_public_ports() {
        assert_eq!(component(ComponentType::Code, "ide").public_port(), 8443);
        assert_eq!(component(ComponentType::KvStore, "kv").public_port(), 6379);
        assert_eq!(component(ComponentType::DocStore, "db").public_port(), 27017);
        assert_eq!(component(ComponentType::Unknown, "x").public_port(), 8080);
    }

    #[test]
    fn test_code_render_injects_password_and_session_volume() {
        let mut editor = component(ComponentType::Code, "ide");
        editor.component_metadata.password = "hunter2".into();

        let (container, volume) = editor.render("session-abc").unwrap();
        assert_eq!(container.image, "linuxserver/code-server");
        assert!(container
            .env
            .iter()
            .any(|env| env.name == "PASSWORD" && env.value == "hunter2"));
        assert_eq!(container.volume_mounts[0].mount_path, "/config/workspace");

        let volume = volume.unwrap();
        assert_eq!(volume.claim, "session-abc");
    }

    #[test]
    fn test_store_components_use_shared_claims() {
        let (_, volume) = component(ComponentType::KvStore, "kv")
            .render("session-abc")
            .unwrap();
        assert_eq!(volume.unwrap().claim, KV_CLAIM);

        let (_, volume) = component(ComponentType::DocStore, "db")
            .render("session-abc")
            .unwrap();
        assert_eq!(volume.unwrap().claim, DOC_CLAIM);
    }

    #[test]
    fn test_unknown_component_is_an_error() {
        let result = component(ComponentType::Unknown, "x").render("session-abc");
        assert!(matches!(
            result,
            Err(SessionError::UnsupportedComponent { .. })
        ));
    }

    #[test]
    fn test_render_components_dedupes_shared_volumes() {
        let components = vec![
            component(ComponentType::KvStore, "kv-a"),
            component(ComponentType::KvStore, "kv-b"),
            component(ComponentType::Code, "ide"),
        ];
        let (containers, volumes) = render_components(&components, "session-abc").unwrap();
        assert_eq!(containers.len(), 3);
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec![KV_CLAIM, "session-abc"]);
    }

    #[test]
    fn test_component_wire_shape() {
        let json = r#"{
            "componentType": "code",
            "exposeComponent": true,
            "componentID": "ide",
            "componentMetadata": {"password": "p"}
        }"#;
        let parsed: Component = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.component_type, ComponentType::Code);
        assert_eq!(parsed.component_id, "ide");
        assert!(parsed.expose_component);
        assert_eq!(parsed.component_metadata.password, "p");

        let encoded = serde_json::to_value(&parsed).unwrap();
        assert_eq!(encoded["componentID"], "ide");
        assert_eq!(encoded["componentType"], "code");
    }

    #[test]
    fn test_unrecognized_type_tag_parses_as_unknown() {
        let json = r#"{"componentType": "gpu", "componentID": "g"}"#;
        let parsed: Component = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.component_type, ComponentType::Unknown);
    }

    #[test]
    fn test_metadata_debug_redacts_password() {
        let metadata = ComponentMetadata {
            password: "secret".into(),
            url: String::new(),
        };
        let rendered = format!("{metadata:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
