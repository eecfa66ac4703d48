//! shipyard-core
//!
//! Deployment configuration, deterministic resource naming and Kubernetes
//! manifest rendering shared by the cluster bootstrapper and the pipeline.

pub mod config;
pub mod error;
pub mod manifest;
pub mod naming;

pub use config::{
    AppService, Application, CloudflareCredentials, DatabaseAdapter, DatabaseConfig,
    DeployConfig, ProviderCredentials, ServerGroup, ServiceConfig, DEFAULT_CONFIG_FILE,
};
pub use error::{ConfigError, ManifestError, Result};
pub use manifest::Manifests;
pub use naming::{Namer, hostname, redact};
