//! # autodev-api
//!
//! HTTP composition layer for the autodev session orchestrator.
//!
//! This crate is a thin surface with no lifecycle policy of its own:
//!
//! - **Routing**: the session routes plus healthcheck, metrics, and OpenAPI
//! - **Locking discipline**: per-session lock around every session route;
//!   the shared ingress lock additionally around create and delete (session
//!   lock first, ingress lock second, released in reverse)
//! - **Serialization**: JSON bodies, `{"error": string}` error envelopes,
//!   SSE log streaming
//!
//! ## Endpoints
//!
//! ```text
//! GET    /healthcheck                    - Liveness
//! POST   /init/{sessionID}               - Create record + session claim
//! POST   /create/{sessionID}             - Populate components
//! GET    /statuses/{sessionID}           - Per-container runtime states
//! GET    /logs/{sessionID}/{componentID} - SSE log stream
//! POST   /refresh/{sessionID}            - Reconcile with the cluster
//! PATCH  /toggle/{sessionID}             - Running <-> Stopped
//! DELETE /{sessionID}                    - Destroy all derived objects
//! GET    /metrics                        - Prometheus exposition
//! GET    /openapi.json                   - OpenAPI document
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod openapi;
pub mod routes;
pub mod server;

pub use config::{Config, Environment};
pub use error::{ApiError, ApiErrorBody, ApiResult};
pub use server::{AppState, Server};
