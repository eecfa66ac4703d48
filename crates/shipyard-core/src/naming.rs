//! Resource naming
//!
//! Every cloud and Kubernetes object shipyard creates is named here, so that
//! a rerun finds what the previous run left behind.

use sha2::{Digest, Sha256};

/// Node label carrying the server group, used for workload placement
pub const NODE_LABEL: &str = "shipyard.io/server-name";
/// Host directory under which attached volumes are mounted
pub const VOLUME_ROOT: &str = "/opt/shipyard/volumes";
pub const REGISTRY_NAME: &str = "shipyard-registry";
pub const REGISTRY_NODE_PORT: u16 = 30500;
pub const ERROR_BACKEND_NAME: &str = "shipyard-error-backend";
/// Set by the ingress error backend; its presence marks a failed route
pub const ERROR_HEADER: &str = "X-Shipyard-Error";
pub const LOCK_DIR: &str = "/tmp";

const MAX_NAME_LEN: usize = 63;
const TRUNCATED_LEN: usize = 54;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namer {
    app: String,
    prefix: String,
}

impl Namer {
    pub fn new(app_name: &str) -> Self {
        Self {
            app: app_name.to_string(),
            prefix: container_prefix(app_name),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app
    }

    /// DNS-label-safe prefix for images, tunnels and locks
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn server_name(&self, group: &str, index: u32) -> String {
        format!("{}-{}-{}", self.app, group, index)
    }

    pub fn network_name(&self) -> String {
        format!("{}-network", self.prefix)
    }

    pub fn firewall_name(&self) -> String {
        format!("{}-firewall", self.prefix)
    }

    /// Volumes belong to a server group and attach to its first server
    pub fn volume_name(&self, group: &str, volume: &str) -> String {
        format!("{}-{}-{}", self.app, group, volume)
    }

    pub fn volume_host_path(&self, group: &str, volume: &str) -> String {
        format!("{}/{}", VOLUME_ROOT, self.volume_name(group, volume))
    }

    pub fn app_deployment_name(&self, service: &str) -> String {
        format!("{}-{}", self.app, service)
    }

    pub fn app_secret_name(&self) -> String {
        format!("app-secret-{}", self.app)
    }

    /// Secret for an app service that adds its own env on top of the shared one
    pub fn app_service_secret_name(&self, service: &str) -> String {
        format!("app-secret-{}-{}", self.app, service)
    }

    pub fn pod_selector(&self, service: &str) -> String {
        format!("app={}", self.app_deployment_name(service))
    }

    pub fn database_name(&self) -> String {
        format!("db-{}", self.app)
    }

    pub fn database_secret_name(&self) -> String {
        format!("db-secret-{}", self.app)
    }

    pub fn database_selector(&self) -> String {
        format!("app={}", self.database_name())
    }

    pub fn service_name(&self, service: &str) -> String {
        format!("{}-{}", self.app, service)
    }

    pub fn tunnel_name(&self, service: &str) -> String {
        format!("{}-{}", self.prefix, service)
    }

    pub fn cloudflared_name(&self, service: &str) -> String {
        format!("cloudflared-{}", service)
    }

    /// Image repository inside the cluster registry
    pub fn image_repository(&self) -> String {
        format!("localhost:{}/{}", REGISTRY_NODE_PORT, self.prefix)
    }

    pub fn image_tag(&self, timestamp: &str) -> String {
        format!("{}:{}", self.prefix, timestamp)
    }

    pub fn registry_image(&self, timestamp: &str) -> String {
        format!("{}:{}", self.image_repository(), timestamp)
    }

    pub fn lock_path(&self) -> String {
        format!("{}/shipyard-deploy-{}.lock", LOCK_DIR, self.prefix)
    }
}

/// Names over 63 chars keep 54 and gain an 8-char hash suffix
pub fn container_prefix(app_name: &str) -> String {
    if app_name.len() <= MAX_NAME_LEN {
        return app_name.to_string();
    }
    let digest = hex::encode(Sha256::digest(app_name.as_bytes()));
    let head: String = app_name.chars().take(TRUNCATED_LEN).collect();
    format!("{}-{}", head.trim_end_matches('-'), &digest[..8])
}

/// `sub.domain`, or the bare domain when the subdomain is empty or `@`
pub fn hostname(subdomain: Option<&str>, domain: &str) -> String {
    match subdomain {
        Some(sub) if !sub.is_empty() && sub != "@" => format!("{}.{}", sub, domain),
        _ => domain.to_string(),
    }
}

/// Show at most a short prefix of a secret
pub fn redact(secret: &str) -> String {
    if secret.len() <= 8 {
        return "***".to_string();
    }
    let head: String = secret.chars().take(4).collect();
    format!("{}***", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let namer = Namer::new("myapp");
        assert_eq!(namer.server_name("master", 1), "myapp-master-1");
        assert_eq!(namer.network_name(), "myapp-network");
        assert_eq!(namer.volume_name("master", "data"), "myapp-master-data");
        assert_eq!(
            namer.volume_host_path("master", "data"),
            "/opt/shipyard/volumes/myapp-master-data"
        );
        assert_eq!(namer.app_service_secret_name("web"), "app-secret-myapp-web");
        assert_eq!(namer.database_name(), "db-myapp");
        assert_eq!(namer.pod_selector("web"), "app=myapp-web");
        assert_eq!(namer.cloudflared_name("web"), "cloudflared-web");
        assert_eq!(
            namer.registry_image("20240101120000"),
            "localhost:30500/myapp:20240101120000"
        );
        assert_eq!(namer.lock_path(), "/tmp/shipyard-deploy-myapp.lock");
    }

    #[test]
    fn test_long_prefix_is_truncated_and_stable() {
        let long = "a".repeat(70);
        let prefix = container_prefix(&long);
        assert_eq!(prefix.len(), 54 + 1 + 8);
        assert_eq!(prefix, container_prefix(&long));
        assert_ne!(prefix, container_prefix(&"a".repeat(71)));
    }

    #[test]
    fn test_hostname() {
        assert_eq!(hostname(Some("www"), "example.com"), "www.example.com");
        assert_eq!(hostname(Some("@"), "example.com"), "example.com");
        assert_eq!(hostname(None, "example.com"), "example.com");
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("short"), "***");
        assert_eq!(redact("eyJhIjoiYiJ9.token"), "eyJh***");
    }
}
