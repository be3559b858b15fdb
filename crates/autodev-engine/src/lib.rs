//! # autodev-engine
//!
//! Session lifecycle engine for the autodev orchestrator.
//!
//! This crate implements the domain layer:
//!
//! - **Component Catalog**: Pure mapping from declared components to
//!   container specs, volume requirements, and public ports
//! - **Cluster Adapter**: Thin façade over the container-orchestration API
//!   (claims, deployments, pods, services, ingresses, log streams)
//! - **Session Engine**: The lifecycle state machine coupling the KV record,
//!   the cluster objects, and the declared component list
//!
//! ## Concurrency contract
//!
//! The engine does not acquire locks itself. Callers serialize mutating
//! operations per session with the session lock and serialize ingress
//! read-modify-writes with the ingress lock (session lock first, ingress
//! lock second; release in reverse).

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod cluster;
pub mod components;
pub mod error;
pub mod session;

pub use cluster::{ClusterBackend, KubeCluster, LogStream, MemoryCluster};
pub use components::{Component, ComponentMetadata, ComponentState, ComponentType};
pub use error::{Result, SessionError};
pub use session::{EngineConfig, SessionEngine, SessionInfo, SessionState, EMPTY_RECORD};
