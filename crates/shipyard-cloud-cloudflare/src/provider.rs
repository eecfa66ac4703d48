//! [`TunnelProvider`] backed by Cloudflare Tunnels and DNS

use crate::client::CloudflareClient;
use async_trait::async_trait;
use shipyard_cloud::{
    BestEffort, CloudError, PollError, PollPolicy, Result, TunnelInfo, TunnelProvider,
    TunnelRequest, poll,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Budget for the remote configuration to become visible
pub const CONFIG_VERIFY_POLL: PollPolicy = PollPolicy::secs(10, 2);

pub struct CloudflareTunnels {
    client: CloudflareClient,
    verify: PollPolicy,
}

impl CloudflareTunnels {
    pub fn new(api_token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self::with_client(CloudflareClient::new(api_token, account_id))
    }

    pub fn with_client(client: CloudflareClient) -> Self {
        Self {
            client,
            verify: CONFIG_VERIFY_POLL,
        }
    }

    pub fn with_verify_policy(mut self, policy: PollPolicy) -> Self {
        self.verify = policy;
        self
    }

    pub fn client(&self) -> &CloudflareClient {
        &self.client
    }

    pub async fn validate_credentials(&self) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .get("/user/tokens/verify", &[])
            .await
            .map_err(|e| CloudError::Validation(format!("cloudflare credentials invalid: {}", e)))?;
        Ok(())
    }

    async fn verify_configuration(
        &self,
        tunnel_id: &str,
        hostname: &str,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let result = poll(self.verify, "tunnel configuration", cancel, || async move {
            match self.client.tunnel_configuration(tunnel_id).await {
                Ok(config) => Ok::<_, CloudError>(config.routes(hostname, service).then_some(())),
                Err(e) => {
                    debug!(tunnel = %tunnel_id, error = %e, "Configuration not readable yet");
                    Ok(None)
                }
            }
        })
        .await;

        result.map_err(|e| match e {
            PollError::Exhausted { attempts, .. } => CloudError::Tunnel(format!(
                "tunnel configuration not propagated after {} attempts",
                attempts
            )),
            other => other.into(),
        })
    }
}

fn tunnel_error(err: CloudError) -> CloudError {
    match err {
        CloudError::Authentication(_) | CloudError::Cancelled(_) | CloudError::Tunnel(_) => err,
        other => CloudError::Tunnel(other.to_string()),
    }
}

fn dns_error(err: CloudError) -> CloudError {
    match err {
        CloudError::Authentication(_) | CloudError::Dns(_) => err,
        other => CloudError::Dns(other.to_string()),
    }
}

#[async_trait]
impl TunnelProvider for CloudflareTunnels {
    #[tracing::instrument(skip(self, request, cancel), fields(tunnel = %request.tunnel_name))]
    async fn ensure_tunnel(
        &self,
        request: &TunnelRequest,
        cancel: &CancellationToken,
    ) -> Result<TunnelInfo> {
        let tunnel = match self
            .client
            .find_tunnel(&request.tunnel_name)
            .await
            .map_err(tunnel_error)?
        {
            Some(existing) => {
                info!(id = %existing.id, "Using existing tunnel");
                existing
            }
            None => {
                info!("Creating tunnel");
                self.client
                    .create_tunnel(&request.tunnel_name)
                    .await
                    .map_err(tunnel_error)?
            }
        };

        let token = match tunnel.token.clone().filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => self
                .client
                .tunnel_token(&tunnel.id)
                .await
                .map_err(tunnel_error)?,
        };
        if token.is_empty() {
            return Err(CloudError::Tunnel(format!(
                "empty token for tunnel {}",
                request.tunnel_name
            )));
        }

        info!(hostname = %request.hostname, origin = %request.origin_url, "Configuring tunnel ingress");
        self.client
            .update_tunnel_configuration(&tunnel.id, &request.hostname, &request.origin_url)
            .await
            .map_err(tunnel_error)?;
        self.verify_configuration(&tunnel.id, &request.hostname, &request.origin_url, cancel)
            .await?;

        let zone = self
            .client
            .find_zone(&request.domain)
            .await
            .map_err(dns_error)?
            .ok_or_else(|| CloudError::Dns(format!("zone not found: {}", request.domain)))?;
        let target = format!("{}.cfargotunnel.com", tunnel.id);
        self.client
            .upsert_dns_record(&zone.id, &request.hostname, "CNAME", &target, true)
            .await
            .map_err(dns_error)?;

        Ok(TunnelInfo {
            service_name: request.service_name.clone(),
            hostname: request.hostname.clone(),
            tunnel_id: tunnel.id,
            tunnel_token: token,
        })
    }

    async fn remove_tunnel(&self, tunnel_name: &str, hostname: &str, domain: &str) -> BestEffort {
        let mut report = BestEffort::new();

        if let Some(Some(zone)) = report.record("find zone", self.client.find_zone(domain).await) {
            let record = report.record(
                format!("find DNS record {}", hostname),
                self.client.find_dns_record(&zone.id, hostname, "CNAME").await,
            );
            if let Some(Some(record)) = record {
                info!(record = %hostname, "Deleting DNS record");
                report.record(
                    format!("delete DNS record {}", hostname),
                    self.client.delete_dns_record(&zone.id, &record.id).await,
                );
            }
        }

        let tunnel = report.record(
            format!("find tunnel {}", tunnel_name),
            self.client.find_tunnel(tunnel_name).await,
        );
        if let Some(Some(tunnel)) = tunnel {
            info!(tunnel = %tunnel_name, "Deleting tunnel");
            report.record(
                "delete tunnel connections",
                self.client.delete_tunnel_connections(&tunnel.id).await,
            );
            report.record(
                format!("delete tunnel {}", tunnel_name),
                self.client.delete_tunnel(&tunnel.id).await,
            );
        }

        report
    }
}
