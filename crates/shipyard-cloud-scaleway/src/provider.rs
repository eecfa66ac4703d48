//! Scaleway provider implementation

use crate::client::ScalewayClient;
use crate::model::*;
use async_trait::async_trait;
use serde_json::{Value, json};
use shipyard_cloud::{
    BestEffort, CloudError, CloudProvider, DEVICE_PATH_POLL, Firewall, Network, PollError,
    PollPolicy, Result, SUBNET_CIDR, Server, ServerCreateOptions, Volume, VolumeCreateOptions,
    poll,
};
use shipyard_remote::{RemoteExecutor, shell};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const VALID_ZONES: &[&str] = &[
    "fr-par-1", "fr-par-2", "fr-par-3", "nl-ams-1", "nl-ams-2", "nl-ams-3", "pl-waw-1",
    "pl-waw-2", "pl-waw-3",
];

const SERVER_POLL_SECS: u64 = 10;

/// Wait for `running` before attaching the private NIC
const NIC_ATTACH_POLL: PollPolicy = PollPolicy::secs(30, 2);

/// A fresh block volume must be `available` before it can be attached
const VOLUME_AVAILABLE_POLL: PollPolicy = PollPolicy::secs(30, 2);

/// Pause between a failed terminate and the poweroff + delete fallback
const POWEROFF_GRACE: Duration = Duration::from_secs(5);

/// `fr-par-1` -> `fr-par`
pub fn zone_to_region(zone: &str) -> String {
    zone.split('-').take(2).collect::<Vec<_>>().join("-")
}

/// Scaleway provider
pub struct ScalewayProvider {
    client: ScalewayClient,
    project_id: String,
    zone: String,
    region: String,
}

impl ScalewayProvider {
    pub fn new(
        secret_key: impl Into<String>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self::with_client(ScalewayClient::new(secret_key), project_id, zone)
    }

    pub fn with_client(
        client: ScalewayClient,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        let zone = zone.into();
        Self {
            client,
            project_id: project_id.into(),
            region: zone_to_region(&zone),
            zone,
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    fn instance(&self, path: &str) -> String {
        format!("/instance/v1/zones/{}{}", self.zone, path)
    }

    fn vpc(&self, path: &str) -> String {
        format!("/vpc/v2/regions/{}{}", self.region, path)
    }

    fn block(&self, path: &str) -> String {
        format!("/block/v1alpha1/zones/{}{}", self.zone, path)
    }

    async fn find_network(&self, name: &str) -> Result<Option<PrivateNetwork>> {
        let list: PrivateNetworksEnvelope = self.client.get(&self.vpc("/private-networks")).await?;
        Ok(list.private_networks.into_iter().find(|n| n.name == name))
    }

    async fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>> {
        let list: SecurityGroupsEnvelope =
            self.client.get(&self.instance("/security_groups")).await?;
        Ok(list.security_groups.into_iter().find(|sg| sg.name == name))
    }

    async fn list_servers_api(&self) -> Result<Vec<ScwServer>> {
        let list: ServersEnvelope = self.client.get(&self.instance("/servers")).await?;
        Ok(list.servers)
    }

    async fn get_server(&self, id: &str) -> Result<ScwServer> {
        let env: ServerEnvelope = self
            .client
            .get(&self.instance(&format!("/servers/{}", id)))
            .await?;
        Ok(env.server)
    }

    async fn server_action(&self, id: &str, action: &str) -> Result<()> {
        let _: Value = self
            .client
            .post(
                &self.instance(&format!("/servers/{}/action", id)),
                &json!({ "action": action }),
            )
            .await?;
        Ok(())
    }

    async fn server_types(&self) -> Result<ProductsEnvelope> {
        self.client.get(&self.instance("/products/servers")).await
    }

    async fn find_image(&self, name: &str) -> Result<Option<Image>> {
        let list: ImagesEnvelope = self
            .client
            .get(&self.instance(&format!(
                "/images?arch=x86_64&name={}",
                image_label(name)
            )))
            .await?;
        Ok(list.images.into_iter().next())
    }

    async fn list_private_nics(&self, server_id: &str) -> Result<Vec<PrivateNic>> {
        let list: PrivateNicsEnvelope = self
            .client
            .get(&self.instance(&format!("/servers/{}/private_nics", server_id)))
            .await?;
        Ok(list.private_nics)
    }

    async fn delete_private_nic(&self, server_id: &str, nic_id: &str) -> Result<()> {
        self.client
            .delete(&self.instance(&format!("/servers/{}/private_nics/{}", server_id, nic_id)))
            .await
    }

    async fn wait_for_state(
        &self,
        server_id: &str,
        state: &str,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ScwServer> {
        poll(policy, "server state", cancel, || async move {
            let server = self.get_server(server_id).await?;
            Ok::<_, CloudError>((server.state == state).then_some(server))
        })
        .await
        .map_err(CloudError::from)
    }

    async fn wait_for_volume_available(&self, volume_id: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let result = poll(
            VOLUME_AVAILABLE_POLL,
            "volume available",
            &cancel,
            || async move {
                let volume: BlockVolume = self
                    .client
                    .get(&self.block(&format!("/volumes/{}", volume_id)))
                    .await?;
                Ok::<_, CloudError>((volume.status == "available").then_some(()))
            },
        )
        .await;

        result.map_err(|e| match e {
            PollError::Exhausted { .. } => {
                CloudError::Volume(format!("volume {} did not become available", volume_id))
            }
            other => other.into(),
        })
    }

    /// Terminate, falling back to poweroff + delete when terminate is refused
    async fn terminate(&self, id: &str) -> Result<()> {
        let Err(terminate_err) = self.server_action(id, "terminate").await else {
            return Ok(());
        };
        warn!(server = %id, error = %terminate_err, "Terminate failed, powering off and deleting");

        let fallback = async {
            self.server_action(id, "poweroff").await?;
            tokio::time::sleep(POWEROFF_GRACE).await;
            self.client
                .delete(&self.instance(&format!("/servers/{}", id)))
                .await
        };
        fallback.await.map_err(|_| terminate_err)
    }
}

#[async_trait]
impl CloudProvider for ScalewayProvider {
    fn name(&self) -> &str {
        "scaleway"
    }

    async fn find_or_create_network(&self, name: &str) -> Result<Network> {
        if let Some(existing) = self.find_network(name).await? {
            debug!(network = %name, id = %existing.id, "Private network already exists");
            return Ok(existing.into());
        }

        info!(network = %name, region = %self.region, "Creating private network");
        let created: PrivateNetwork = self
            .client
            .post(
                &self.vpc("/private-networks"),
                &json!({
                    "name": name,
                    "project_id": self.project_id,
                    "subnets": [SUBNET_CIDR],
                }),
            )
            .await?;
        Ok(created.into())
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        self.find_network(name)
            .await?
            .map(Into::into)
            .ok_or_else(|| CloudError::Network(format!("network not found: {}", name)))
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        // NICs left on servers block deletion
        let mut report = BestEffort::new();
        let servers = report
            .record("list servers", self.list_servers_api().await)
            .unwrap_or_default();
        for server in servers {
            let nics = report
                .record(
                    format!("list NICs of {}", server.name),
                    self.list_private_nics(&server.id).await,
                )
                .unwrap_or_default();
            for nic in nics
                .into_iter()
                .filter(|n| n.private_network_id.as_deref() == Some(id))
            {
                report.record(
                    format!("remove NIC {} from {}", nic.id, server.name),
                    self.delete_private_nic(&server.id, &nic.id).await,
                );
            }
        }

        self.client
            .delete(&self.vpc(&format!("/private-networks/{}", id)))
            .await
    }

    async fn find_or_create_firewall(&self, name: &str) -> Result<Firewall> {
        if let Some(existing) = self.find_security_group(name).await? {
            debug!(firewall = %name, id = %existing.id, "Security group already exists");
            return Ok(existing.into());
        }

        info!(firewall = %name, "Creating security group");
        let created: SecurityGroupEnvelope = self
            .client
            .post(
                &self.instance("/security_groups"),
                &json!({
                    "name": name,
                    "project": self.project_id,
                    "stateful": true,
                    "inbound_default_policy": "drop",
                    "outbound_default_policy": "accept",
                }),
            )
            .await?;
        let sg = created.security_group;

        let _: Value = self
            .client
            .post(
                &self.instance(&format!("/security_groups/{}/rules", sg.id)),
                &json!({
                    "protocol": "TCP",
                    "direction": "inbound",
                    "action": "accept",
                    "ip_range": "0.0.0.0/0",
                    "dest_port_from": 22,
                    "dest_port_to": 22,
                }),
            )
            .await?;

        Ok(sg.into())
    }

    async fn get_firewall_by_name(&self, name: &str) -> Result<Firewall> {
        self.find_security_group(name)
            .await?
            .map(Into::into)
            .ok_or_else(|| CloudError::Firewall(format!("security group not found: {}", name)))
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.client
            .delete(&self.instance(&format!("/security_groups/{}", id)))
            .await
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        Ok(self
            .list_servers_api()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .map(Into::into))
    }

    async fn find_server_by_id(&self, id: &str) -> Result<Option<Server>> {
        match self.get_server(id).await {
            Ok(server) => Ok(Some(server.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        Ok(self
            .list_servers_api()
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    #[tracing::instrument(skip(self, opts), fields(server = %opts.name))]
    async fn create_server(&self, opts: &ServerCreateOptions) -> Result<Server> {
        if let Some(existing) = self.find_server(&opts.name).await? {
            debug!(id = %existing.id, "Server already exists");
            return Ok(existing);
        }

        if !self.server_types().await?.servers.contains_key(&opts.server_type) {
            return Err(CloudError::Validation(format!(
                "invalid server type: {}",
                opts.server_type
            )));
        }
        let image = self
            .find_image(&opts.image)
            .await?
            .ok_or_else(|| CloudError::Validation(format!("invalid image: {}", opts.image)))?;

        info!(server_type = %opts.server_type, zone = %self.zone, "Creating server");
        let mut body = json!({
            "name": opts.name,
            "commercial_type": opts.server_type,
            "image": image.id,
            "project": self.project_id,
            "boot_type": "local",
            "tags": [],
        });
        if let Some(sg) = opts.firewall_id.as_deref().filter(|id| !id.is_empty()) {
            body["security_group"] = json!(sg);
        }
        let created: ServerEnvelope = self.client.post(&self.instance("/servers"), &body).await?;
        let id = created.server.id;

        if let Some(user_data) = opts.user_data.as_deref().filter(|u| !u.is_empty()) {
            self.client
                .patch_text(
                    &self.instance(&format!("/servers/{}/user_data/cloud-init", id)),
                    user_data,
                )
                .await?;
        }

        self.server_action(&id, "poweron").await?;

        if let Some(network_id) = opts.network_id.as_deref().filter(|n| !n.is_empty()) {
            self.wait_for_state(&id, "running", NIC_ATTACH_POLL, &CancellationToken::new())
                .await?;
            let _: Value = self
                .client
                .post(
                    &self.instance(&format!("/servers/{}/private_nics", id)),
                    &json!({ "private_network_id": network_id }),
                )
                .await?;
        }

        Ok(self.get_server(&id).await?.into())
    }

    async fn wait_for_server(
        &self,
        id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Server> {
        let result = poll(
            PollPolicy::secs(max_attempts, SERVER_POLL_SECS),
            "server running",
            cancel,
            || async move {
                let server: Server = self.get_server(id).await?.into();
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
        let mut report = BestEffort::new();
        let nics = report
            .record("list private NICs", self.list_private_nics(id).await)
            .unwrap_or_default();
        for nic in nics {
            report.record(
                format!("remove private NIC {}", nic.id),
                self.delete_private_nic(id, &nic.id).await,
            );
        }

        self.terminate(id).await?;
        Ok(report)
    }

    async fn create_volume(&self, opts: &VolumeCreateOptions) -> Result<Volume> {
        if let Some(existing) = self.get_volume_by_name(&opts.name).await? {
            debug!(volume = %opts.name, id = %existing.id, "Volume already exists");
            return Ok(existing);
        }

        if let Err(e) = self.get_server(&opts.server_id).await {
            return Err(if e.is_not_found() {
                CloudError::Volume(format!("server not found: {}", opts.server_id))
            } else {
                e
            });
        }

        info!(volume = %opts.name, size_gb = opts.size_gb, "Creating block volume");
        let created: BlockVolume = self
            .client
            .post(
                &self.block("/volumes"),
                &json!({
                    "name": opts.name,
                    "perf_iops": 5000,
                    "from_empty": { "size": gb_to_bytes(opts.size_gb) },
                    "project_id": self.project_id,
                }),
            )
            .await?;
        Ok(created.into())
    }

    async fn get_volume(&self, id: &str) -> Result<Option<Volume>> {
        let result: Result<BlockVolume> = self
            .client
            .get(&self.block(&format!("/volumes/{}", id)))
            .await;
        match result {
            Ok(volume) => Ok(Some(volume.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        let list: VolumesEnvelope = self.client.get(&self.block("/volumes")).await?;
        Ok(list
            .volumes
            .into_iter()
            .find(|v| v.name == name)
            .map(Into::into))
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.client
            .delete(&self.block(&format!("/volumes/{}", id)))
            .await
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        let server = match self.get_server(server_id).await {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                return Err(CloudError::Volume(format!("server not found: {}", server_id)));
            }
            Err(e) => return Err(e),
        };

        if server.volumes.values().any(|v| v.id == volume_id) {
            debug!(volume = %volume_id, "Volume already attached");
            return Ok(());
        }
        if let Some(volume) = self.get_volume(volume_id).await?
            && volume.is_attached()
        {
            return Err(CloudError::Volume(format!(
                "volume {} is attached to another server",
                volume.name
            )));
        }

        self.wait_for_volume_available(volume_id).await?;

        let mut volumes = server.volumes.clone();
        volumes.insert(
            server.next_volume_index().to_string(),
            AttachedVolume {
                id: volume_id.to_string(),
                volume_type: Some("sbs_volume".to_string()),
            },
        );
        let _: Value = self
            .client
            .patch(
                &self.instance(&format!("/servers/{}", server_id)),
                &json!({ "volumes": volumes }),
            )
            .await?;
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        for server in self.list_servers_api().await? {
            let Some(slot) = server
                .volumes
                .iter()
                .find(|(_, v)| v.id == volume_id)
                .map(|(k, _)| k.clone())
            else {
                continue;
            };

            let mut volumes = server.volumes.clone();
            volumes.remove(&slot);
            let _: Value = self
                .client
                .patch(
                    &self.instance(&format!("/servers/{}", server.id)),
                    &json!({ "volumes": volumes }),
                )
                .await?;
            return Ok(());
        }
        Ok(())
    }

    async fn wait_for_device_path(
        &self,
        volume_id: &str,
        remote: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        // Block volumes show up under /dev/disk/by-id with the volume id in the name
        let command = format!(
            "ls /dev/disk/by-id/ 2>/dev/null | grep -i {} || true",
            shell::quote(volume_id)
        );
        let result = poll(DEVICE_PATH_POLL, "volume device path", cancel, || {
            let command = command.clone();
            async move {
                match remote.execute(&command).await {
                    Ok(output) => Ok(output
                        .lines()
                        .map(str::trim)
                        .find(|l| !l.is_empty())
                        .map(|name| format!("/dev/disk/by-id/{}", name))),
                    Err(e) if e.is_connection() => Ok(None),
                    Err(e) => Err(CloudError::from(e)),
                }
            }
        })
        .await;

        match result {
            Ok(path) => Ok(Some(path)),
            Err(PollError::Exhausted { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn validate_credentials(&self) -> Result<()> {
        match self.server_types().await {
            Ok(_) => Ok(()),
            Err(CloudError::Authentication(msg)) => Err(CloudError::Validation(format!(
                "scaleway credentials invalid: {}",
                msg
            ))),
            Err(e) => Err(e),
        }
    }

    async fn validate_instance_type(&self, instance_type: &str) -> Result<()> {
        if self.server_types().await?.servers.contains_key(instance_type) {
            Ok(())
        } else {
            Err(CloudError::Validation(format!(
                "invalid scaleway server type: {}",
                instance_type
            )))
        }
    }

    async fn validate_region(&self, region: &str) -> Result<()> {
        if VALID_ZONES.contains(&region) {
            Ok(())
        } else {
            Err(CloudError::Validation(format!(
                "invalid scaleway zone: {}. Valid: {}",
                region,
                VALID_ZONES.join(", ")
            )))
        }
    }
}
