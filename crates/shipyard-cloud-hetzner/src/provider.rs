//! Hetzner Cloud provider implementation

use crate::client::HetznerClient;
use crate::model::*;
use async_trait::async_trait;
use serde_json::{Value, json};
use shipyard_cloud::{
    BestEffort, CloudError, CloudProvider, DEVICE_PATH_POLL, Firewall, NETWORK_CIDR, Network,
    PollError, PollPolicy, Result, SUBNET_CIDR, Server, ServerCreateOptions, VOLUME_FILESYSTEM,
    Volume, VolumeCreateOptions, poll,
};
use shipyard_remote::RemoteExecutor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NETWORK_ZONE: &str = "eu-central";

/// Interval between `wait_for_server` lookups
const SERVER_POLL_SECS: u64 = 10;

/// Hetzner ids are integers; everything above this module passes strings
fn parse_id(id: &str) -> Result<u64> {
    id.parse::<u64>()
        .map_err(|_| CloudError::Validation(format!("invalid hetzner id: {}", id)))
}

/// Hetzner Cloud provider
pub struct HetznerProvider {
    client: HetznerClient,
}

/// Largest page the list endpoints serve
const MAX_PER_PAGE: u32 = 50;

/// List endpoints page at 25 items; the `name` filter finds a resource
/// wherever it sits
fn by_name(collection: &str, name: &str) -> String {
    format!("{}?name={}", collection, name)
}

impl HetznerProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: HetznerClient::new(token),
        }
    }

    pub fn with_client(client: HetznerClient) -> Self {
        Self { client }
    }

    async fn find_network(&self, name: &str) -> Result<Option<HNetwork>> {
        let list: NetworksEnvelope = self.client.get(&by_name("/networks", name)).await?;
        Ok(list.networks.into_iter().find(|n| n.name == name))
    }

    async fn find_firewall(&self, name: &str) -> Result<Option<HFirewall>> {
        let list: FirewallsEnvelope = self.client.get(&by_name("/firewalls", name)).await?;
        Ok(list.firewalls.into_iter().find(|f| f.name == name))
    }

    async fn get_server(&self, id: u64) -> Result<HServer> {
        let env: ServerEnvelope = self.client.get(&format!("/servers/{}", id)).await?;
        Ok(env.server)
    }

    async fn server_type_exists(&self, name: &str) -> Result<bool> {
        let list: ServerTypesEnvelope = self.client.get("/server_types").await?;
        Ok(list.server_types.iter().any(|t| t.name == name))
    }

    async fn location_exists(&self, name: &str) -> Result<bool> {
        let list: LocationsEnvelope = self.client.get("/locations").await?;
        Ok(list.locations.iter().any(|l| l.name == name))
    }

    async fn image_exists(&self, name: &str) -> Result<bool> {
        let list: ImagesEnvelope = self.client.get(&format!("/images?name={}", name)).await?;
        Ok(!list.images.is_empty())
    }
}

#[async_trait]
impl CloudProvider for HetznerProvider {
    fn name(&self) -> &str {
        "hetzner"
    }

    async fn find_or_create_network(&self, name: &str) -> Result<Network> {
        if let Some(existing) = self.find_network(name).await? {
            debug!(network = %name, id = existing.id, "Network already exists");
            return Ok(existing.into());
        }

        info!(network = %name, "Creating network");
        let body = CreateNetwork {
            name,
            ip_range: NETWORK_CIDR,
            subnets: vec![Subnet {
                kind: "cloud",
                ip_range: SUBNET_CIDR,
                network_zone: NETWORK_ZONE,
            }],
        };
        let created: NetworkEnvelope = self.client.post("/networks", &body).await?;
        Ok(created.network.into())
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        self.find_network(name)
            .await?
            .map(Into::into)
            .ok_or_else(|| CloudError::Network(format!("network not found: {}", name)))
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/networks/{}", parse_id(id)?))
            .await
    }

    async fn find_or_create_firewall(&self, name: &str) -> Result<Firewall> {
        if let Some(existing) = self.find_firewall(name).await? {
            debug!(firewall = %name, id = existing.id, "Firewall already exists");
            return Ok(existing.into());
        }

        info!(firewall = %name, "Creating firewall");
        let body = CreateFirewall {
            name,
            rules: vec![FirewallRule {
                direction: "in",
                protocol: "tcp",
                port: "22",
                source_ips: vec!["0.0.0.0/0", "::/0"],
            }],
        };
        let created: FirewallEnvelope = self.client.post("/firewalls", &body).await?;
        Ok(created.firewall.into())
    }

    async fn get_firewall_by_name(&self, name: &str) -> Result<Firewall> {
        self.find_firewall(name)
            .await?
            .map(Into::into)
            .ok_or_else(|| CloudError::Firewall(format!("firewall not found: {}", name)))
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/firewalls/{}", parse_id(id)?))
            .await
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        let list: ServersEnvelope = self.client.get(&by_name("/servers", name)).await?;
        Ok(list
            .servers
            .into_iter()
            .find(|s| s.name == name)
            .map(Into::into))
    }

    async fn find_server_by_id(&self, id: &str) -> Result<Option<Server>> {
        match self.get_server(parse_id(id)?).await {
            Ok(server) => Ok(Some(server.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let list: ServersEnvelope = self.client.get(&format!("/servers?per_page={}", MAX_PER_PAGE)).await?;
        Ok(list.servers.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(skip(self, opts), fields(server = %opts.name))]
    async fn create_server(&self, opts: &ServerCreateOptions) -> Result<Server> {
        if let Some(existing) = self.find_server(&opts.name).await? {
            debug!(id = %existing.id, "Server already exists");
            return Ok(existing);
        }

        if !self.server_type_exists(&opts.server_type).await? {
            return Err(CloudError::Validation(format!(
                "invalid server type: {}",
                opts.server_type
            )));
        }
        if !self.image_exists(&opts.image).await? {
            return Err(CloudError::Validation(format!(
                "invalid image: {}",
                opts.image
            )));
        }
        if !self.location_exists(&opts.location).await? {
            return Err(CloudError::Validation(format!(
                "invalid location: {}",
                opts.location
            )));
        }

        let networks = match opts.network_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => vec![parse_id(id)?],
            None => Vec::new(),
        };
        let firewalls = match opts.firewall_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => vec![FirewallRef {
                firewall: parse_id(id)?,
            }],
            None => Vec::new(),
        };

        info!(server_type = %opts.server_type, location = %opts.location, "Creating server");
        let body = CreateServer {
            name: &opts.name,
            server_type: &opts.server_type,
            image: &opts.image,
            location: &opts.location,
            user_data: opts.user_data.as_deref(),
            start_after_create: true,
            networks,
            firewalls,
        };
        let created: ServerEnvelope = self.client.post("/servers", &body).await?;
        Ok(created.server.into())
    }

    async fn wait_for_server(
        &self,
        id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Server> {
        let server_id = parse_id(id)?;
        let result = poll(
            PollPolicy::secs(max_attempts, SERVER_POLL_SECS),
            "server running",
            cancel,
            || async move {
                let server: Server = self.get_server(server_id).await?.into();
                Ok::<_, CloudError>(server.is_ready().then_some(server))
            },
        )
        .await;

        result.map_err(|e| match e {
            PollError::Exhausted { attempts, .. } => CloudError::ServerCreation(format!(
                "server did not become running after {} attempts",
                attempts
            )),
            other => other.into(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_server(&self, id: &str) -> Result<BestEffort> {
        let server_id = parse_id(id)?;
        let mut report = BestEffort::new();
        let server = self.get_server(server_id).await?;

        let firewalls: Option<FirewallsEnvelope> =
            report.record(
                "list firewalls",
                self.client
                    .get(&format!("/firewalls?per_page={}", MAX_PER_PAGE))
                    .await,
            );
        for fw in firewalls
            .map(|f| f.firewalls)
            .unwrap_or_default()
            .into_iter()
            .filter(|fw| fw.is_applied_to_server(server_id))
        {
            let body = json!({
                "remove_from": [{ "type": "server", "server": { "id": server_id } }]
            });
            let result: Result<Value> = self
                .client
                .post(
                    &format!("/firewalls/{}/actions/remove_from_resources", fw.id),
                    &body,
                )
                .await;
            report.record(format!("remove firewall {} from server", fw.name), result);
        }

        for net in &server.private_net {
            let result: Result<Value> = self
                .client
                .post(
                    &format!("/servers/{}/actions/detach_from_network", server_id),
                    &json!({ "network": net.network }),
                )
                .await;
            report.record(format!("detach server from network {}", net.network), result);
        }

        info!(server = %server.name, "Deleting server");
        self.client
            .delete(&format!("/servers/{}", server_id))
            .await?;
        Ok(report)
    }

    async fn create_volume(&self, opts: &VolumeCreateOptions) -> Result<Volume> {
        if let Some(existing) = self.get_volume_by_name(&opts.name).await? {
            debug!(volume = %opts.name, id = %existing.id, "Volume already exists");
            return Ok(existing);
        }

        let server = match self.get_server(parse_id(&opts.server_id)?).await {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                return Err(CloudError::Volume(format!(
                    "server not found: {}",
                    opts.server_id
                )));
            }
            Err(e) => return Err(e),
        };
        let location = server
            .datacenter
            .map(|dc| dc.location.name)
            .ok_or_else(|| {
                CloudError::Volume(format!("server {} has no location", opts.server_id))
            })?;

        info!(volume = %opts.name, size_gb = opts.size_gb, location = %location, "Creating volume");
        let body = CreateVolume {
            name: &opts.name,
            size: opts.size_gb,
            location: &location,
            format: VOLUME_FILESYSTEM,
        };
        let created: VolumeEnvelope = self.client.post("/volumes", &body).await?;
        Ok(created.volume.into())
    }

    async fn get_volume(&self, id: &str) -> Result<Option<Volume>> {
        let result: Result<VolumeEnvelope> = self
            .client
            .get(&format!("/volumes/{}", parse_id(id)?))
            .await;
        match result {
            Ok(env) => Ok(Some(env.volume.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        let list: VolumesEnvelope = self.client.get(&by_name("/volumes", name)).await?;
        Ok(list
            .volumes
            .into_iter()
            .find(|v| v.name == name)
            .map(Into::into))
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/volumes/{}", parse_id(id)?))
            .await
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        let volume = self
            .get_volume(volume_id)
            .await?
            .ok_or_else(|| CloudError::Volume(format!("volume not found: {}", volume_id)))?;

        if volume.is_attached_to(server_id) {
            debug!(volume = %volume.name, "Volume already attached");
            return Ok(());
        }
        if volume.is_attached() {
            return Err(CloudError::Volume(format!(
                "volume {} is attached to another server",
                volume.name
            )));
        }

        let _: Value = self
            .client
            .post(
                &format!("/volumes/{}/actions/attach", parse_id(volume_id)?),
                &json!({ "server": parse_id(server_id)? }),
            )
            .await?;
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        let _: Value = self
            .client
            .post(
                &format!("/volumes/{}/actions/detach", parse_id(volume_id)?),
                &json!({}),
            )
            .await?;
        Ok(())
    }

    async fn wait_for_device_path(
        &self,
        volume_id: &str,
        _remote: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        // The API reports linux_device once the attach action has finished
        let result = poll(DEVICE_PATH_POLL, "volume device path", cancel, || async move {
            Ok::<_, CloudError>(
                self.get_volume(volume_id)
                    .await?
                    .and_then(|v| v.device_path),
            )
        })
        .await;

        match result {
            Ok(path) => Ok(Some(path)),
            Err(PollError::Exhausted { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn validate_credentials(&self) -> Result<()> {
        match self.client.get::<ServerTypesEnvelope>("/server_types").await {
            Ok(_) => Ok(()),
            Err(CloudError::Authentication(msg)) => Err(CloudError::Validation(format!(
                "hetzner credentials invalid: {}",
                msg
            ))),
            Err(e) => Err(e),
        }
    }

    async fn validate_instance_type(&self, instance_type: &str) -> Result<()> {
        if self.server_type_exists(instance_type).await? {
            Ok(())
        } else {
            Err(CloudError::Validation(format!(
                "invalid hetzner server type: {}",
                instance_type
            )))
        }
    }

    async fn validate_region(&self, region: &str) -> Result<()> {
        if self.location_exists(region).await? {
            Ok(())
        } else {
            Err(CloudError::Validation(format!(
                "invalid hetzner location: {}",
                region
            )))
        }
    }
}
