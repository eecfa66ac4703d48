//! Cloudflare Tunnel API (`cfd_tunnel`)

use crate::client::CloudflareClient;
use crate::model::{Configuration, ConfigurationBody, CreateTunnel, Tunnel, TunnelConfig};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use shipyard_cloud::Result;

/// Random 32-byte secret, base64 encoded
fn tunnel_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    BASE64.encode(bytes)
}

impl CloudflareClient {
    fn tunnels_path(&self) -> String {
        format!("/accounts/{}/cfd_tunnel", self.account_id())
    }

    pub async fn find_tunnel(&self, name: &str) -> Result<Option<Tunnel>> {
        let tunnels: Vec<Tunnel> = self
            .get(
                &self.tunnels_path(),
                &[("name", name), ("is_deleted", "false")],
            )
            .await?;
        Ok(tunnels.into_iter().find(|t| t.name == name))
    }

    /// Remotely managed tunnel (`config_src: cloudflare`)
    pub async fn create_tunnel(&self, name: &str) -> Result<Tunnel> {
        self.post(
            &self.tunnels_path(),
            &CreateTunnel {
                name,
                tunnel_secret: tunnel_secret(),
                config_src: "cloudflare",
            },
        )
        .await
    }

    pub async fn tunnel_token(&self, tunnel_id: &str) -> Result<String> {
        self.get(&format!("{}/{}/token", self.tunnels_path(), tunnel_id), &[])
            .await
    }

    pub async fn update_tunnel_configuration(
        &self,
        tunnel_id: &str,
        hostname: &str,
        service: &str,
    ) -> Result<()> {
        let body = ConfigurationBody {
            config: TunnelConfig::single_route(hostname, service),
        };
        let _: serde_json::Value = self
            .put(
                &format!("{}/{}/configurations", self.tunnels_path(), tunnel_id),
                &body,
            )
            .await?;
        Ok(())
    }

    pub async fn tunnel_configuration(&self, tunnel_id: &str) -> Result<TunnelConfig> {
        let configuration: Configuration = self
            .get(
                &format!("{}/{}/configurations", self.tunnels_path(), tunnel_id),
                &[],
            )
            .await?;
        Ok(configuration.config.unwrap_or_default())
    }

    /// Drop active connector connections; a tunnel with live connections cannot be deleted
    pub async fn delete_tunnel_connections(&self, tunnel_id: &str) -> Result<()> {
        self.delete(&format!("{}/{}/connections", self.tunnels_path(), tunnel_id))
            .await
    }

    pub async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()> {
        self.delete(&format!("{}/{}", self.tunnels_path(), tunnel_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_secret_is_32_bytes() {
        let secret = tunnel_secret();
        assert_eq!(BASE64.decode(&secret).unwrap().len(), 32);
        assert_ne!(secret, tunnel_secret());
    }
}
