//! Cloud provider trait definition

use crate::error::{CloudError, Result};
use crate::resource::{Firewall, Network, Server, ServerCreateOptions, Volume, VolumeCreateOptions};
use crate::teardown::BestEffort;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shipyard_remote::RemoteExecutor;
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Cloud provider abstraction trait
///
/// Hetzner, AWS and Scaleway implement this trait so the reconciler can
/// provision the same topology on any of them.
///
/// Idempotency contract: every create operation first looks the resource up
/// by name and returns the existing one unmodified when present. Calling
/// `find_or_create_network("x")` twice yields the same id, never a duplicate.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "hetzner", "aws")
    fn name(&self) -> &str;

    // ---- Network ----

    async fn find_or_create_network(&self, name: &str) -> Result<Network>;

    /// Fails with [`CloudError::Network`] when absent
    async fn get_network_by_name(&self, name: &str) -> Result<Network>;

    async fn delete_network(&self, id: &str) -> Result<()>;

    // ---- Firewall ----

    /// Created firewalls always carry an SSH (tcp/22) ingress rule
    async fn find_or_create_firewall(&self, name: &str) -> Result<Firewall>;

    /// Fails with [`CloudError::Firewall`] when absent
    async fn get_firewall_by_name(&self, name: &str) -> Result<Firewall>;

    async fn delete_firewall(&self, id: &str) -> Result<()>;

    // ---- Server ----

    async fn find_server(&self, name: &str) -> Result<Option<Server>>;

    async fn find_server_by_id(&self, id: &str) -> Result<Option<Server>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    /// Returns the existing server when one with `opts.name` already exists
    async fn create_server(&self, opts: &ServerCreateOptions) -> Result<Server>;

    /// Poll until the server is running with a public address.
    /// Fails with [`CloudError::ServerCreation`] after `max_attempts`.
    async fn wait_for_server(
        &self,
        id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Server>;

    /// Detach from firewalls/networks first (best-effort), then delete.
    /// The returned report lists detach failures that were swallowed.
    async fn delete_server(&self, id: &str) -> Result<BestEffort>;

    // ---- Volume ----

    /// Returns the existing volume when one with `opts.name` already exists
    async fn create_volume(&self, opts: &VolumeCreateOptions) -> Result<Volume>;

    async fn get_volume(&self, id: &str) -> Result<Option<Volume>>;

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>>;

    async fn delete_volume(&self, id: &str) -> Result<()>;

    /// No-op when the volume is already attached to `server_id`
    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()>;

    async fn detach_volume(&self, volume_id: &str) -> Result<()>;

    /// Poll for the block device path of an attached volume. Providers that
    /// do not report it through their API look it up on the host via `remote`.
    async fn wait_for_device_path(
        &self,
        volume_id: &str,
        remote: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;

    // ---- Validation ----

    async fn validate_credentials(&self) -> Result<()>;

    async fn validate_instance_type(&self, instance_type: &str) -> Result<()>;

    async fn validate_region(&self, region: &str) -> Result<()>;
}

/// Supported compute vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Hetzner,
    Aws,
    Scaleway,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Hetzner => "hetzner",
            ProviderKind::Aws => "aws",
            ProviderKind::Scaleway => "scaleway",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hetzner" => Ok(ProviderKind::Hetzner),
            "aws" => Ok(ProviderKind::Aws),
            "scaleway" => Ok(ProviderKind::Scaleway),
            other => Err(CloudError::Validation(format!(
                "unknown provider: {} (expected hetzner, aws or scaleway)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_roundtrip() {
        for kind in [ProviderKind::Hetzner, ProviderKind::Aws, ProviderKind::Scaleway] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
        assert!("digitalocean".parse::<ProviderKind>().is_err());
    }
}
