//! Kubernetes manifest rendering
//!
//! Manifests are Tera templates compiled into the binary. Every free-form
//! value goes through `json_encode` so the output stays valid YAML whatever
//! the input contains.

use crate::error::ManifestError;
use crate::naming::{ERROR_BACKEND_NAME, ERROR_HEADER, NODE_LABEL, REGISTRY_NAME, REGISTRY_NODE_PORT};
use serde::Serialize;
use std::collections::BTreeMap;
use tera::{Context, Tera};
use tracing::debug;

pub type Result<T> = std::result::Result<T, ManifestError>;

const TEMPLATES: &[(&str, &str)] = &[
    ("app-secret.yaml", include_str!("../templates/app-secret.yaml")),
    ("app-deployment.yaml", include_str!("../templates/app-deployment.yaml")),
    ("app-service.yaml", include_str!("../templates/app-service.yaml")),
    ("app-ingress.yaml", include_str!("../templates/app-ingress.yaml")),
    ("db-statefulset.yaml", include_str!("../templates/db-statefulset.yaml")),
    ("service-deployment.yaml", include_str!("../templates/service-deployment.yaml")),
    ("cloudflared.yaml", include_str!("../templates/cloudflared.yaml")),
    ("registry.yaml", include_str!("../templates/registry.yaml")),
    ("error-backend.yaml", include_str!("../templates/error-backend.yaml")),
    ("cloud-init.yaml", include_str!("../templates/cloud-init.yaml")),
];

#[derive(Debug, Clone, Serialize)]
pub struct SecretManifest {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resources {
    pub request_memory: String,
    pub request_cpu: String,
    pub limit_memory: String,
    pub limit_cpu: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            request_memory: "128Mi".to_string(),
            request_cpu: "100m".to_string(),
            limit_memory: "512Mi".to_string(),
            limit_cpu: "500m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    pub path: String,
    pub port: u16,
    pub initial_delay: u32,
    pub period: u32,
    pub timeout: u32,
    pub failure_threshold: u32,
}

impl Probe {
    pub fn readiness(path: &str, port: u16) -> Self {
        Self {
            path: path.to_string(),
            port,
            initial_delay: 10,
            period: 10,
            timeout: 5,
            failure_threshold: 3,
        }
    }

    pub fn liveness(path: &str, port: u16) -> Self {
        Self {
            path: path.to_string(),
            port,
            initial_delay: 30,
            period: 30,
            timeout: 10,
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostPathMount {
    pub name: String,
    pub mount_path: String,
    pub host_path: String,
}

/// App workload; `port: None` renders the worker variant
#[derive(Debug, Clone, Serialize)]
pub struct AppManifest {
    pub name: String,
    pub image: String,
    pub replicas: u32,
    pub port: Option<u16>,
    pub command: Option<String>,
    pub secret_name: String,
    pub servers: Vec<String>,
    pub resources: Resources,
    pub readiness: Option<Probe>,
    pub liveness: Option<Probe>,
    pub volumes: Vec<HostPathMount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServicePortManifest {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngressManifest {
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseManifest {
    pub name: String,
    pub adapter: String,
    pub image: String,
    pub port: u16,
    pub secret_name: String,
    pub data_path: String,
    pub storage_size: String,
    pub servers: Vec<String>,
    pub host_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuxServiceManifest {
    pub name: String,
    pub service: String,
    pub image: String,
    pub port: Option<u16>,
    pub command: Option<String>,
    pub env: BTreeMap<String, String>,
    pub servers: Vec<String>,
    pub volume: Option<HostPathMount>,
}

#[derive(Clone, Serialize)]
pub struct CloudflaredManifest {
    pub name: String,
    pub token: String,
}

impl std::fmt::Debug for CloudflaredManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflaredManifest")
            .field("name", &self.name)
            .field("token", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryManifest {
    pub name: String,
    pub group: String,
    pub node_port: u16,
    pub storage_path: String,
}

impl RegistryManifest {
    /// Registry pinned to the nodes of the master group
    pub fn on(group: &str) -> Self {
        Self {
            name: REGISTRY_NAME.to_string(),
            group: group.to_string(),
            node_port: REGISTRY_NODE_PORT,
            storage_path: "/opt/shipyard/registry".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBackendManifest {
    pub name: String,
    pub header: String,
}

impl Default for ErrorBackendManifest {
    fn default() -> Self {
        Self {
            name: ERROR_BACKEND_NAME.to_string(),
            header: ERROR_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudInit {
    pub user: String,
    pub ssh_public_key: String,
    pub volume_root: String,
}

/// Compiled manifest templates
pub struct Manifests {
    tera: Tera,
}

impl Manifests {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())
            .map_err(|e| ManifestError::Load(error_chain(&e)))?;
        Ok(Self { tera })
    }

    fn render<T: Serialize>(&self, template: &str, data: &T) -> Result<String> {
        let mut context = Context::from_serialize(data).map_err(|e| ManifestError::Render {
            template: template.to_string(),
            message: error_chain(&e),
        })?;
        context.insert("node_label", NODE_LABEL);

        let rendered = self
            .tera
            .render(template, &context)
            .map_err(|e| ManifestError::Render {
                template: template.to_string(),
                message: error_chain(&e),
            })?;
        debug!(template, bytes = rendered.len(), "Rendered manifest");
        Ok(rendered)
    }

    pub fn app_secret(&self, secret: &SecretManifest) -> Result<String> {
        self.render("app-secret.yaml", secret)
    }

    pub fn app_deployment(&self, app: &AppManifest) -> Result<String> {
        self.render("app-deployment.yaml", app)
    }

    pub fn app_service(&self, service: &ServicePortManifest) -> Result<String> {
        self.render("app-service.yaml", service)
    }

    pub fn ingress(&self, ingress: &IngressManifest) -> Result<String> {
        self.render("app-ingress.yaml", ingress)
    }

    pub fn database(&self, db: &DatabaseManifest) -> Result<String> {
        self.render("db-statefulset.yaml", db)
    }

    pub fn aux_service(&self, svc: &AuxServiceManifest) -> Result<String> {
        self.render("service-deployment.yaml", svc)
    }

    pub fn cloudflared(&self, tunnel: &CloudflaredManifest) -> Result<String> {
        self.render("cloudflared.yaml", tunnel)
    }

    pub fn registry(&self, registry: &RegistryManifest) -> Result<String> {
        self.render("registry.yaml", registry)
    }

    pub fn error_backend(&self, backend: &ErrorBackendManifest) -> Result<String> {
        self.render("error-backend.yaml", backend)
    }

    pub fn cloud_init(&self, init: &CloudInit) -> Result<String> {
        self.render("cloud-init.yaml", init)
    }
}

/// Tera hides the useful part of an error in its source chain
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(": ")
}
