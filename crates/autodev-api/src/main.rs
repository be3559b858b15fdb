//! `autodev-api` binary entrypoint.
//!
//! Loads configuration from environment variables, connects the consistent
//! KV and the cluster, and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;

use autodev_api::config::Config;
use autodev_api::server::Server;
use autodev_core::observability::{init_logging, LogFormat};
use autodev_core::{EtcdKv, KvStore};
use autodev_engine::{ClusterBackend, KubeCluster};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    tracing::info!(endpoints = ?config.kv_endpoints, "connecting to consistent KV");
    let kv: Arc<dyn KvStore> = Arc::new(EtcdKv::connect(&config.kv_endpoints).await?);

    tracing::info!(namespace = %config.namespace, "connecting to cluster");
    let cluster: Arc<dyn ClusterBackend> =
        Arc::new(KubeCluster::connect(config.namespace.clone()).await?);

    Server::new(config, kv, cluster).serve().await?;
    Ok(())
}
