//! # autodev-core
//!
//! Core primitives for the autodev session orchestrator.
//!
//! This crate provides the foundational pieces used across all autodev
//! components:
//!
//! - **Error Types**: Shared error taxonomy and result alias
//! - **Consistent KV**: The [`kv::KvStore`] contract with etcd and in-memory
//!   backends, including lease grant/keep-alive/revoke
//! - **Lock Manager**: Leased distributed mutual exclusion keyed by string
//! - **Saga Runner**: Ordered steps with reverse-order compensation on first
//!   failure
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `autodev-core` holds no session-lifecycle policy. The state machine lives
//! in `autodev-engine`; HTTP concerns live in `autodev-api`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod kv;
pub mod lock;
pub mod observability;
pub mod saga;

pub use error::{Error, Result};
pub use kv::{EtcdKv, KvStore, LeaseId, MemoryKv};
pub use lock::{LockConfig, LockGuard, LockManager};
pub use saga::{compensation, Compensation, Saga, SagaContext, StepOutput};
