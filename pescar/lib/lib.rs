//! `pescar` keeps annotated Kubernetes Deployments on the newest image their registry publishes.
//!
//! # Overview
//!
//! pescar watches Deployments carrying the `pescar: "true"` annotation and tracks each of their
//! containers as an *isca*. For every active isca it:
//! - polls the originating registry for the newest image, by tag order or by creation date
//! - records each new digest as an image revision linked to the one it supersedes
//! - patches the Deployment to the new digest and waits for the rollout to become healthy
//! - rolls back to the previous revision when the rollout fails and the isca allows it
//!
//! Iscas are grouped in *anzols*, which carry registry credentials and the rollback and pulling
//! defaults of their members.
//!
//! # Architecture
//!
//! - **Registry**: Docker Registry HTTP API v2 client with bearer token caching
//! - **Cluster**: Deployment watch, image patching and health checks through `kube`
//! - **Store**: SQLite persistence of anzols, iscas and revisions
//! - **Engine**: the reconciler, poller and dispatcher loops and rollbacks
//! - **Server**: admin REST API
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pescar::{
//!     cluster::KubeCluster,
//!     config::PescarConfig,
//!     engine::{EngineSettings, Pescar},
//!     registry::DockerRegistryClient,
//!     store::SqliteStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PescarConfig::load(None).await?;
//!
//!     let pescar = Pescar::new(
//!         Arc::new(SqliteStore::open(config.get_database().resolved_path()).await?),
//!         Arc::new(KubeCluster::connect(config.get_kubernetes()).await?),
//!         Arc::new(DockerRegistryClient::new(3, 8)),
//!         EngineSettings::from(&config),
//!     );
//!
//!     pescar.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`cluster`] - Kubernetes access
//! - [`config`] - Configuration file and defaults
//! - [`engine`] - The update loops and rollbacks
//! - [`models`] - Anzols, iscas and image revisions
//! - [`reference`] - Image reference parsing
//! - [`registry`] - Container registry client
//! - [`server`] - Admin REST API
//! - [`store`] - Persistence

#![warn(missing_docs)]

mod error;
mod log;

#[cfg(test)]
mod test_support;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod models;
pub mod reference;
pub mod registry;
pub mod server;
pub mod store;

pub use error::*;
pub use log::*;
