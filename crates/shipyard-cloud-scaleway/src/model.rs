//! Scaleway API payloads

use serde::{Deserialize, Serialize};
use shipyard_cloud::{Firewall, Network, Server, ServerStatus, Volume};
use std::collections::BTreeMap;

const BYTES_PER_GB: u64 = 1_000_000_000;

#[derive(Debug, Deserialize)]
pub struct PrivateNetwork {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<SubnetInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SubnetInfo {
    #[serde(default)]
    pub subnet: Option<String>,
}

impl From<PrivateNetwork> for Network {
    fn from(n: PrivateNetwork) -> Self {
        Network {
            ip_range: n.subnets.into_iter().find_map(|s| s.subnet),
            id: n.id,
            name: n.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

impl From<SecurityGroup> for Firewall {
    fn from(sg: SecurityGroup) -> Self {
        Firewall {
            id: sg.id,
            name: sg.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScwServer {
    pub id: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub public_ip: Option<PublicIp>,
    #[serde(default)]
    pub public_ips: Vec<PublicIp>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub volumes: BTreeMap<String, AttachedVolume>,
}

#[derive(Debug, Deserialize)]
pub struct PublicIp {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedVolume {
    pub id: String,
    #[serde(default)]
    pub volume_type: Option<String>,
}

impl ScwServer {
    pub fn public_address(&self) -> Option<String> {
        self.public_ip
            .iter()
            .chain(self.public_ips.iter())
            .find_map(|ip| ip.address.clone())
            .filter(|a| !a.is_empty())
    }

    /// Next free slot in the volumes map (slot 0 is the boot volume)
    pub fn next_volume_index(&self) -> u32 {
        self.volumes
            .keys()
            .filter_map(|k| k.parse::<u32>().ok())
            .max()
            .map_or(0, |max| max + 1)
    }
}

impl From<ScwServer> for Server {
    fn from(s: ScwServer) -> Self {
        Server {
            public_ipv4: s.public_address(),
            status: ServerStatus::from_vendor(&s.state),
            private_ipv4: s.private_ip,
            id: s.id,
            name: s.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockVolume {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub zone: Option<String>,
    pub status: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
pub struct Reference {
    pub product_resource_type: String,
    pub product_resource_id: String,
}

impl From<BlockVolume> for Volume {
    fn from(v: BlockVolume) -> Self {
        let server_id = v
            .references
            .into_iter()
            .find(|r| r.product_resource_type == "instance_server")
            .map(|r| r.product_resource_id);
        Volume {
            id: v.id,
            name: v.name,
            size_gb: (v.size / BYTES_PER_GB) as u32,
            location: v.zone,
            status: v.status,
            server_id,
            device_path: None,
        }
    }
}

pub fn gb_to_bytes(size_gb: u32) -> u64 {
    u64::from(size_gb) * BYTES_PER_GB
}

#[derive(Debug, Deserialize)]
pub struct Image {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PrivateNic {
    pub id: String,
    #[serde(default)]
    pub private_network_id: Option<String>,
}

// ---- Envelopes ----

#[derive(Debug, Deserialize)]
pub struct PrivateNetworksEnvelope {
    #[serde(default)]
    pub private_networks: Vec<PrivateNetwork>,
}

#[derive(Debug, Deserialize)]
pub struct SecurityGroupsEnvelope {
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Deserialize)]
pub struct SecurityGroupEnvelope {
    pub security_group: SecurityGroup,
}

#[derive(Debug, Deserialize)]
pub struct ServersEnvelope {
    #[serde(default)]
    pub servers: Vec<ScwServer>,
}

#[derive(Debug, Deserialize)]
pub struct ServerEnvelope {
    pub server: ScwServer,
}

/// `/products/servers` keys commercial types by name
#[derive(Debug, Deserialize)]
pub struct ProductsEnvelope {
    #[serde(default)]
    pub servers: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ImagesEnvelope {
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
pub struct VolumesEnvelope {
    #[serde(default)]
    pub volumes: Vec<BlockVolume>,
}

#[derive(Debug, Deserialize)]
pub struct PrivateNicsEnvelope {
    #[serde(default)]
    pub private_nics: Vec<PrivateNic>,
}

/// Marketplace label for a distro image name
pub fn image_label(name: &str) -> &str {
    match name {
        "ubuntu-24.04" => "ubuntu_noble",
        "ubuntu-22.04" => "ubuntu_jammy",
        "ubuntu-20.04" => "ubuntu_focal",
        "debian-12" => "debian_bookworm",
        "debian-11" => "debian_bullseye",
        other => other,
    }
}
