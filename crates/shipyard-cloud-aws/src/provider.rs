//! AWS EC2 provider implementation

use crate::convert::{aws_error, ebs_to_volume, filter, instance_to_server, name_tag, newest_image};
use async_trait::async_trait;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::config::Credentials;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, InstanceType, IpPermission, IpRange, ResourceType, UserIdGroupPair,
    VolumeType,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use shipyard_cloud::{
    BestEffort, CloudError, CloudProvider, DEVICE_PATH_POLL, Firewall, NETWORK_CIDR, Network,
    PollError, PollPolicy, Result, SUBNET_CIDR, Server, ServerCreateOptions, Volume,
    VolumeCreateOptions, poll,
};
use shipyard_remote::RemoteExecutor;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Canonical's publisher account
const UBUNTU_OWNER: &str = "099720109477";
const UBUNTU_AMI_PATTERN: &str = "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-*";

const SERVER_POLL_SECS: u64 = 5;
const VOLUME_DEVICE: &str = "/dev/xvdf";

/// Nitro instances expose EBS volumes as NVMe devices linked from a
/// by-id path built from the volume id. Xen instances keep the attachment name.
fn resolve_device_script(volume_id: &str, attachment: &str) -> String {
    let by_id = format!(
        "/dev/disk/by-id/nvme-Amazon_Elastic_Block_Store_{}",
        volume_id.replace('-', "")
    );
    format!(
        "if [ -e {by_id} ]; then readlink -f {by_id}; elif [ -b {att} ]; then echo {att}; fi",
        by_id = by_id,
        att = attachment
    )
}

/// Instance states that still count as "exists" for name lookups
const LIVE_STATES: &[&str] = &["pending", "running", "stopping", "stopped"];

/// AWS EC2 provider
pub struct AwsProvider {
    client: Client,
    region: String,
    /// VPC resolved by the last network call; security groups are created in it
    vpc_id: Mutex<Option<String>>,
}

impl AwsProvider {
    /// Build a client from static credentials
    pub async fn connect(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        let region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "shipyard",
        );
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        Self::with_client(Client::new(&config), region)
    }

    pub fn with_client(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
            vpc_id: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn remember_vpc(&self, vpc_id: &str) {
        let mut slot = self.vpc_id.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(vpc_id.to_string());
    }

    fn remembered_vpc(&self) -> Option<String> {
        self.vpc_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn find_vpc(&self, name: &str) -> Result<Option<aws_sdk_ec2::types::Vpc>> {
        let out = self
            .client
            .describe_vpcs()
            .filters(filter("tag:Name", &[name]))
            .send()
            .await
            .map_err(|e| aws_error("describe_vpcs", e))?;
        Ok(out.vpcs().first().cloned())
    }

    async fn default_vpc(&self) -> Result<String> {
        let out = self
            .client
            .describe_vpcs()
            .filters(filter("isDefault", &["true"]))
            .send()
            .await
            .map_err(|e| aws_error("describe_vpcs", e))?;
        out.vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Network("no default VPC found".to_string()))
    }

    async fn find_security_group(
        &self,
        name: &str,
    ) -> Result<Option<aws_sdk_ec2::types::SecurityGroup>> {
        let out = self
            .client
            .describe_security_groups()
            .filters(filter("group-name", &[name]))
            .send()
            .await
            .map_err(|e| aws_error("describe_security_groups", e))?;
        Ok(out.security_groups().first().cloned())
    }

    async fn describe_instance(&self, id: &str) -> Result<Option<aws_sdk_ec2::types::Instance>> {
        let out = self
            .client
            .describe_instances()
            .instance_ids(id)
            .send()
            .await
            .map_err(|e| aws_error("describe_instances", e))?;
        Ok(out
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .cloned())
    }

    async fn describe_volume(&self, id: &str) -> Result<Option<aws_sdk_ec2::types::Volume>> {
        let out = self
            .client
            .describe_volumes()
            .volume_ids(id)
            .send()
            .await
            .map_err(|e| aws_error("describe_volumes", e))?;
        Ok(out.volumes().first().cloned())
    }

    async fn ubuntu_ami(&self) -> Result<String> {
        let out = self
            .client
            .describe_images()
            .owners(UBUNTU_OWNER)
            .filters(filter("name", &[UBUNTU_AMI_PATTERN]))
            .filters(filter("state", &["available"]))
            .send()
            .await
            .map_err(|e| aws_error("describe_images", e))?;
        newest_image(out.images())
            .and_then(|i| i.image_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::ServerCreation("no Ubuntu 22.04 AMI found".to_string()))
    }

    /// VPC, public subnet, internet gateway and default route
    async fn create_network(&self, name: &str) -> Result<Network> {
        let vpc = self
            .client
            .create_vpc()
            .cidr_block(NETWORK_CIDR)
            .tag_specifications(name_tag(ResourceType::Vpc, name))
            .send()
            .await
            .map_err(|e| aws_error("create_vpc", e))?;
        let vpc_id = vpc
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| CloudError::Network("create_vpc returned no id".to_string()))?
            .to_string();

        self.client
            .modify_vpc_attribute()
            .vpc_id(&vpc_id)
            .enable_dns_hostnames(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .map_err(|e| aws_error("modify_vpc_attribute", e))?;

        let subnet = self
            .client
            .create_subnet()
            .vpc_id(&vpc_id)
            .cidr_block(SUBNET_CIDR)
            .tag_specifications(name_tag(ResourceType::Subnet, &format!("{}-subnet", name)))
            .send()
            .await
            .map_err(|e| aws_error("create_subnet", e))?;
        let subnet_id = subnet
            .subnet()
            .and_then(|s| s.subnet_id())
            .ok_or_else(|| CloudError::Network("create_subnet returned no id".to_string()))?
            .to_string();

        // Instances launched into the subnet need a public address for SSH
        self.client
            .modify_subnet_attribute()
            .subnet_id(&subnet_id)
            .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .map_err(|e| aws_error("modify_subnet_attribute", e))?;

        let igw = self
            .client
            .create_internet_gateway()
            .tag_specifications(name_tag(
                ResourceType::InternetGateway,
                &format!("{}-igw", name),
            ))
            .send()
            .await
            .map_err(|e| aws_error("create_internet_gateway", e))?;
        let igw_id = igw
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .ok_or_else(|| CloudError::Network("create_internet_gateway returned no id".into()))?
            .to_string();

        self.client
            .attach_internet_gateway()
            .vpc_id(&vpc_id)
            .internet_gateway_id(&igw_id)
            .send()
            .await
            .map_err(|e| aws_error("attach_internet_gateway", e))?;

        let rtb = self
            .client
            .create_route_table()
            .vpc_id(&vpc_id)
            .tag_specifications(name_tag(ResourceType::RouteTable, &format!("{}-rtb", name)))
            .send()
            .await
            .map_err(|e| aws_error("create_route_table", e))?;
        let rtb_id = rtb
            .route_table()
            .and_then(|r| r.route_table_id())
            .ok_or_else(|| CloudError::Network("create_route_table returned no id".into()))?
            .to_string();

        self.client
            .create_route()
            .route_table_id(&rtb_id)
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id(&igw_id)
            .send()
            .await
            .map_err(|e| aws_error("create_route", e))?;

        self.client
            .associate_route_table()
            .route_table_id(&rtb_id)
            .subnet_id(&subnet_id)
            .send()
            .await
            .map_err(|e| aws_error("associate_route_table", e))?;

        Ok(Network {
            id: vpc_id,
            name: name.to_string(),
            ip_range: Some(NETWORK_CIDR.to_string()),
        })
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    async fn find_or_create_network(&self, name: &str) -> Result<Network> {
        let network = match self.find_vpc(name).await? {
            Some(vpc) => {
                debug!(network = %name, "VPC already exists");
                Network {
                    id: vpc.vpc_id().unwrap_or_default().to_string(),
                    name: name.to_string(),
                    ip_range: vpc.cidr_block().map(str::to_string),
                }
            }
            None => {
                info!(network = %name, region = %self.region, "Creating VPC");
                self.create_network(name).await?
            }
        };
        self.remember_vpc(&network.id);
        Ok(network)
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        let vpc = self
            .find_vpc(name)
            .await?
            .ok_or_else(|| CloudError::Network(format!("network not found: {}", name)))?;
        let id = vpc.vpc_id().unwrap_or_default().to_string();
        self.remember_vpc(&id);
        Ok(Network {
            id,
            name: name.to_string(),
            ip_range: vpc.cidr_block().map(str::to_string),
        })
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        // A VPC cannot be deleted while gateways, subnets or custom route tables remain
        let mut report = BestEffort::new();

        let igws = report.record(
            "list internet gateways",
            self.client
                .describe_internet_gateways()
                .filters(filter("attachment.vpc-id", &[id]))
                .send()
                .await
                .map_err(|e| aws_error("describe_internet_gateways", e)),
        );
        for igw_id in igws
            .iter()
            .flat_map(|o| o.internet_gateways())
            .filter_map(|g| g.internet_gateway_id())
        {
            report.record(
                format!("detach internet gateway {}", igw_id),
                self.client
                    .detach_internet_gateway()
                    .internet_gateway_id(igw_id)
                    .vpc_id(id)
                    .send()
                    .await
                    .map_err(|e| aws_error("detach_internet_gateway", e)),
            );
            report.record(
                format!("delete internet gateway {}", igw_id),
                self.client
                    .delete_internet_gateway()
                    .internet_gateway_id(igw_id)
                    .send()
                    .await
                    .map_err(|e| aws_error("delete_internet_gateway", e)),
            );
        }

        let subnets = report.record(
            "list subnets",
            self.client
                .describe_subnets()
                .filters(filter("vpc-id", &[id]))
                .send()
                .await
                .map_err(|e| aws_error("describe_subnets", e)),
        );
        for subnet_id in subnets
            .iter()
            .flat_map(|o| o.subnets())
            .filter_map(|s| s.subnet_id())
        {
            report.record(
                format!("delete subnet {}", subnet_id),
                self.client
                    .delete_subnet()
                    .subnet_id(subnet_id)
                    .send()
                    .await
                    .map_err(|e| aws_error("delete_subnet", e)),
            );
        }

        let tables = report.record(
            "list route tables",
            self.client
                .describe_route_tables()
                .filters(filter("vpc-id", &[id]))
                .send()
                .await
                .map_err(|e| aws_error("describe_route_tables", e)),
        );
        for table in tables.iter().flat_map(|o| o.route_tables()) {
            let is_main = table.associations().iter().any(|a| a.main() == Some(true));
            let Some(rtb_id) = table.route_table_id().filter(|_| !is_main) else {
                continue;
            };
            report.record(
                format!("delete route table {}", rtb_id),
                self.client
                    .delete_route_table()
                    .route_table_id(rtb_id)
                    .send()
                    .await
                    .map_err(|e| aws_error("delete_route_table", e)),
            );
        }

        self.client
            .delete_vpc()
            .vpc_id(id)
            .send()
            .await
            .map_err(|e| aws_error("delete_vpc", e))?;
        Ok(())
    }

    async fn find_or_create_firewall(&self, name: &str) -> Result<Firewall> {
        if let Some(sg) = self.find_security_group(name).await? {
            debug!(firewall = %name, "Security group already exists");
            return Ok(Firewall {
                id: sg.group_id().unwrap_or_default().to_string(),
                name: name.to_string(),
            });
        }

        let vpc_id = match self.remembered_vpc() {
            Some(id) => id,
            None => self.default_vpc().await?,
        };

        info!(firewall = %name, vpc = %vpc_id, "Creating security group");
        let created = self
            .client
            .create_security_group()
            .group_name(name)
            .description("Managed by shipyard")
            .vpc_id(&vpc_id)
            .tag_specifications(name_tag(ResourceType::SecurityGroup, name))
            .send()
            .await
            .map_err(|e| aws_error("create_security_group", e))?;
        let group_id = created
            .group_id()
            .ok_or_else(|| CloudError::Firewall("create_security_group returned no id".into()))?
            .to_string();

        // SSH from anywhere, everything between cluster members
        self.client
            .authorize_security_group_ingress()
            .group_id(&group_id)
            .ip_permissions(
                IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                    .build(),
            )
            .ip_permissions(
                IpPermission::builder()
                    .ip_protocol("-1")
                    .user_id_group_pairs(UserIdGroupPair::builder().group_id(&group_id).build())
                    .build(),
            )
            .send()
            .await
            .map_err(|e| aws_error("authorize_security_group_ingress", e))?;

        Ok(Firewall {
            id: group_id,
            name: name.to_string(),
        })
    }

    async fn get_firewall_by_name(&self, name: &str) -> Result<Firewall> {
        let sg = self
            .find_security_group(name)
            .await?
            .ok_or_else(|| CloudError::Firewall(format!("firewall not found: {}", name)))?;
        Ok(Firewall {
            id: sg.group_id().unwrap_or_default().to_string(),
            name: name.to_string(),
        })
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.client
            .delete_security_group()
            .group_id(id)
            .send()
            .await
            .map_err(|e| aws_error("delete_security_group", e))?;
        Ok(())
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        let out = self
            .client
            .describe_instances()
            .filters(filter("tag:Name", &[name]))
            .filters(filter("instance-state-name", LIVE_STATES))
            .send()
            .await
            .map_err(|e| aws_error("describe_instances", e))?;
        Ok(out
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .map(instance_to_server))
    }

    async fn find_server_by_id(&self, id: &str) -> Result<Option<Server>> {
        match self.describe_instance(id).await {
            Ok(instance) => Ok(instance.as_ref().map(instance_to_server)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let out = self
            .client
            .describe_instances()
            .filters(filter("instance-state-name", LIVE_STATES))
            .send()
            .await
            .map_err(|e| aws_error("describe_instances", e))?;
        Ok(out
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .map(instance_to_server)
            .collect())
    }

    #[tracing::instrument(skip(self, opts), fields(server = %opts.name))]
    async fn create_server(&self, opts: &ServerCreateOptions) -> Result<Server> {
        if let Some(existing) = self.find_server(&opts.name).await? {
            debug!(id = %existing.id, "Instance already exists");
            return Ok(existing);
        }

        let ami = self.ubuntu_ami().await?;
        let mut request = self
            .client
            .run_instances()
            .image_id(ami)
            .instance_type(InstanceType::from(opts.server_type.as_str()))
            .min_count(1)
            .max_count(1)
            .tag_specifications(name_tag(ResourceType::Instance, &opts.name));

        if let Some(user_data) = opts.user_data.as_deref() {
            request = request.user_data(BASE64.encode(user_data));
        }

        if let Some(vpc_id) = opts.network_id.as_deref().filter(|id| !id.is_empty()) {
            let subnets = self
                .client
                .describe_subnets()
                .filters(filter("vpc-id", &[vpc_id]))
                .send()
                .await
                .map_err(|e| aws_error("describe_subnets", e))?;
            if let Some(subnet_id) = subnets.subnets().first().and_then(|s| s.subnet_id()) {
                request = request.subnet_id(subnet_id);
            }
        }

        if let Some(sg) = opts.firewall_id.as_deref().filter(|id| !id.is_empty()) {
            request = request.security_group_ids(sg);
        }

        info!(instance_type = %opts.server_type, region = %self.region, "Launching instance");
        let out = request
            .send()
            .await
            .map_err(|e| aws_error("run_instances", e))?;
        out.instances()
            .first()
            .map(instance_to_server)
            .ok_or_else(|| CloudError::ServerCreation("no instance created".to_string()))
    }

    async fn wait_for_server(
        &self,
        id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Server> {
        let result = poll(
            PollPolicy::secs(max_attempts, SERVER_POLL_SECS),
            "instance running",
            cancel,
            || async move {
                let server = self.describe_instance(id).await?.as_ref().map(instance_to_server);
                Ok::<_, CloudError>(server.filter(Server::is_ready))
            },
        )
        .await;

        result.map_err(|e| match e {
            PollError::Exhausted { attempts, .. } => CloudError::ServerCreation(format!(
                "instance did not become running after {} attempts",
                attempts
            )),
            other => other.into(),
        })
    }

    async fn delete_server(&self, id: &str) -> Result<BestEffort> {
        info!(instance = %id, "Terminating instance");
        self.client
            .terminate_instances()
            .instance_ids(id)
            .send()
            .await
            .map_err(|e| aws_error("terminate_instances", e))?;
        Ok(BestEffort::new())
    }

    async fn create_volume(&self, opts: &VolumeCreateOptions) -> Result<Volume> {
        if let Some(existing) = self.get_volume_by_name(&opts.name).await? {
            debug!(volume = %opts.name, id = %existing.id, "Volume already exists");
            return Ok(existing);
        }

        let instance = self
            .describe_instance(&opts.server_id)
            .await?
            .ok_or_else(|| {
                CloudError::Volume(format!("instance not found: {}", opts.server_id))
            })?;
        let az = instance
            .placement()
            .and_then(|p| p.availability_zone())
            .ok_or_else(|| {
                CloudError::Volume(format!("instance {} has no placement", opts.server_id))
            })?;

        info!(volume = %opts.name, size_gb = opts.size_gb, az = %az, "Creating EBS volume");
        let out = self
            .client
            .create_volume()
            .availability_zone(az)
            .size(opts.size_gb as i32)
            .volume_type(VolumeType::Gp3)
            .tag_specifications(name_tag(ResourceType::Volume, &opts.name))
            .send()
            .await
            .map_err(|e| aws_error("create_volume", e))?;

        Ok(Volume {
            id: out.volume_id().unwrap_or_default().to_string(),
            name: opts.name.clone(),
            size_gb: out.size().unwrap_or(opts.size_gb as i32).max(0) as u32,
            location: out.availability_zone().map(str::to_string),
            status: out
                .state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            server_id: None,
            device_path: None,
        })
    }

    async fn get_volume(&self, id: &str) -> Result<Option<Volume>> {
        match self.describe_volume(id).await {
            Ok(volume) => Ok(volume.as_ref().map(ebs_to_volume)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        let out = self
            .client
            .describe_volumes()
            .filters(filter("tag:Name", &[name]))
            .send()
            .await
            .map_err(|e| aws_error("describe_volumes", e))?;
        Ok(out.volumes().first().map(ebs_to_volume))
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.client
            .delete_volume()
            .volume_id(id)
            .send()
            .await
            .map_err(|e| aws_error("delete_volume", e))?;
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        if let Some(volume) = self.get_volume(volume_id).await? {
            if volume.is_attached_to(server_id) {
                debug!(volume = %volume_id, "Volume already attached");
                return Ok(());
            }
            if volume.is_attached() {
                return Err(CloudError::Volume(format!(
                    "volume {} is attached to another instance",
                    volume_id
                )));
            }
        }

        self.client
            .attach_volume()
            .volume_id(volume_id)
            .instance_id(server_id)
            .device(VOLUME_DEVICE)
            .send()
            .await
            .map_err(|e| aws_error("attach_volume", e))?;
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        self.client
            .detach_volume()
            .volume_id(volume_id)
            .send()
            .await
            .map_err(|e| aws_error("detach_volume", e))?;
        Ok(())
    }

    async fn wait_for_device_path(
        &self,
        volume_id: &str,
        remote: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let attached = poll(DEVICE_PATH_POLL, "volume device path", cancel, || async move {
            let volume = self.describe_volume(volume_id).await?;
            Ok::<_, CloudError>(volume.as_ref().and_then(|v| ebs_to_volume(v).device_path))
        })
        .await;
        let attachment = match attached {
            Ok(path) => path,
            Err(PollError::Exhausted { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let script = resolve_device_script(volume_id, &attachment);
        let resolved = poll(DEVICE_PATH_POLL, "block device", cancel, || {
            let script = script.clone();
            async move {
                let device = remote
                    .execute(&script)
                    .await
                    .map(|out| out.trim().to_string())
                    .unwrap_or_default();
                Ok::<_, CloudError>((!device.is_empty()).then_some(device))
            }
        })
        .await;

        match resolved {
            Ok(device) => {
                debug!(volume = %volume_id, attachment = %attachment, device = %device, "Resolved block device");
                Ok(Some(device))
            }
            Err(PollError::Exhausted { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.client
            .describe_regions()
            .send()
            .await
            .map_err(|e| {
                CloudError::Validation(format!(
                    "aws credentials invalid: {}",
                    aws_error("describe_regions", e)
                ))
            })?;
        Ok(())
    }

    async fn validate_instance_type(&self, instance_type: &str) -> Result<()> {
        let out = self
            .client
            .describe_instance_types()
            .instance_types(InstanceType::from(instance_type))
            .send()
            .await;
        match out {
            Ok(out) if !out.instance_types().is_empty() => Ok(()),
            Ok(_) => Err(CloudError::Validation(format!(
                "invalid AWS instance type: {}",
                instance_type
            ))),
            Err(e) => match aws_error("describe_instance_types", e) {
                CloudError::Validation(_) => Err(CloudError::Validation(format!(
                    "invalid AWS instance type: {}",
                    instance_type
                ))),
                other => Err(other),
            },
        }
    }

    async fn validate_region(&self, region: &str) -> Result<()> {
        let out = self
            .client
            .describe_regions()
            .region_names(region)
            .send()
            .await;
        match out {
            Ok(out) if !out.regions().is_empty() => Ok(()),
            Ok(_) => Err(CloudError::Validation(format!("invalid AWS region: {}", region))),
            Err(e) => match aws_error("describe_regions", e) {
                CloudError::Validation(_) => {
                    Err(CloudError::Validation(format!("invalid AWS region: {}", region)))
                }
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_script_prefers_nvme_link() {
        let script = resolve_device_script("vol-0abc123", VOLUME_DEVICE);
        assert!(script.starts_with(
            "if [ -e /dev/disk/by-id/nvme-Amazon_Elastic_Block_Store_vol0abc123 ]; \
             then readlink -f /dev/disk/by-id/nvme-Amazon_Elastic_Block_Store_vol0abc123;"
        ));
        assert!(script.contains("elif [ -b /dev/xvdf ]; then echo /dev/xvdf; fi"));
    }
}
