//! Public ingress through outbound tunnels

use crate::error::Result;
use crate::teardown::BestEffort;
use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Everything needed to provision one tunnel plus its DNS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub service_name: String,
    pub tunnel_name: String,
    /// Fully qualified hostname, e.g. `api.example.com` or `example.com`
    pub hostname: String,
    /// Zone the hostname lives in
    pub domain: String,
    /// Where the tunnel forwards requests inside the cluster
    pub origin_url: String,
}

/// A provisioned tunnel. The token is what the in-cluster connector runs with.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub service_name: String,
    pub hostname: String,
    pub tunnel_id: String,
    pub tunnel_token: String,
}

impl fmt::Debug for TunnelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelInfo")
            .field("service_name", &self.service_name)
            .field("hostname", &self.hostname)
            .field("tunnel_id", &self.tunnel_id)
            .field("tunnel_token", &"***")
            .finish()
    }
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Find or create the tunnel, point its ingress at `origin_url`, verify the
    /// configuration took effect and upsert a proxied CNAME for `hostname`.
    async fn ensure_tunnel(
        &self,
        request: &TunnelRequest,
        cancel: &CancellationToken,
    ) -> Result<TunnelInfo>;

    /// Delete the DNS record and the tunnel. Every step is best-effort.
    async fn remove_tunnel(&self, tunnel_name: &str, hostname: &str, domain: &str) -> BestEffort;
}
