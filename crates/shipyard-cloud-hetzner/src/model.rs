//! Hetzner API payloads

use serde::{Deserialize, Serialize};
use shipyard_cloud::{Firewall, Network, Server, ServerStatus, Volume};

#[derive(Debug, Deserialize)]
pub struct HNetwork {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub ip_range: Option<String>,
}

impl From<HNetwork> for Network {
    fn from(n: HNetwork) -> Self {
        Network {
            id: n.id.to_string(),
            name: n.name,
            ip_range: n.ip_range,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HFirewall {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub applied_to: Vec<AppliedTo>,
}

impl HFirewall {
    pub fn is_applied_to_server(&self, server_id: u64) -> bool {
        self.applied_to
            .iter()
            .any(|a| a.kind == "server" && a.server.as_ref().map(|s| s.id) == Some(server_id))
    }
}

impl From<HFirewall> for Firewall {
    fn from(f: HFirewall) -> Self {
        Firewall {
            id: f.id.to_string(),
            name: f.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppliedTo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub server: Option<IdRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdRef {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct HServer {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub public_net: Option<PublicNet>,
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
    #[serde(default)]
    pub datacenter: Option<Datacenter>,
}

#[derive(Debug, Deserialize)]
pub struct PublicNet {
    #[serde(default)]
    pub ipv4: Option<Ipv4>,
}

#[derive(Debug, Deserialize)]
pub struct Ipv4 {
    pub ip: String,
}

#[derive(Debug, Deserialize)]
pub struct PrivateNet {
    pub network: u64,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Datacenter {
    pub location: Named,
}

#[derive(Debug, Deserialize)]
pub struct Named {
    pub name: String,
}

impl From<HServer> for Server {
    fn from(s: HServer) -> Self {
        Server {
            id: s.id.to_string(),
            status: ServerStatus::from_vendor(&s.status),
            public_ipv4: s.public_net.and_then(|p| p.ipv4).map(|ip| ip.ip),
            private_ipv4: s.private_net.into_iter().next().and_then(|p| p.ip),
            name: s.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HVolume {
    pub id: u64,
    pub name: String,
    pub size: u32,
    #[serde(default)]
    pub location: Option<Named>,
    pub status: String,
    #[serde(default)]
    pub server: Option<u64>,
    #[serde(default)]
    pub linux_device: Option<String>,
}

impl From<HVolume> for Volume {
    fn from(v: HVolume) -> Self {
        Volume {
            id: v.id.to_string(),
            name: v.name,
            size_gb: v.size,
            location: v.location.map(|l| l.name),
            status: v.status,
            server_id: v.server.map(|id| id.to_string()),
            device_path: v.linux_device.filter(|d| !d.is_empty()),
        }
    }
}

// ---- Envelopes ----

#[derive(Debug, Deserialize)]
pub struct NetworksEnvelope {
    pub networks: Vec<HNetwork>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkEnvelope {
    pub network: HNetwork,
}

#[derive(Debug, Deserialize)]
pub struct FirewallsEnvelope {
    pub firewalls: Vec<HFirewall>,
}

#[derive(Debug, Deserialize)]
pub struct FirewallEnvelope {
    pub firewall: HFirewall,
}

#[derive(Debug, Deserialize)]
pub struct ServersEnvelope {
    pub servers: Vec<HServer>,
}

#[derive(Debug, Deserialize)]
pub struct ServerEnvelope {
    pub server: HServer,
}

#[derive(Debug, Deserialize)]
pub struct VolumesEnvelope {
    pub volumes: Vec<HVolume>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeEnvelope {
    pub volume: HVolume,
}

#[derive(Debug, Deserialize)]
pub struct ServerTypesEnvelope {
    pub server_types: Vec<Named>,
}

#[derive(Debug, Deserialize)]
pub struct LocationsEnvelope {
    pub locations: Vec<Named>,
}

#[derive(Debug, Deserialize)]
pub struct ImagesEnvelope {
    #[serde(default)]
    pub images: Vec<Named>,
}

// ---- Requests ----

#[derive(Debug, Serialize)]
pub struct CreateNetwork<'a> {
    pub name: &'a str,
    pub ip_range: &'a str,
    pub subnets: Vec<Subnet<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Subnet<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub ip_range: &'a str,
    pub network_zone: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateFirewall<'a> {
    pub name: &'a str,
    pub rules: Vec<FirewallRule<'a>>,
}

#[derive(Debug, Serialize)]
pub struct FirewallRule<'a> {
    pub direction: &'a str,
    pub protocol: &'a str,
    pub port: &'a str,
    pub source_ips: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CreateServer<'a> {
    pub name: &'a str,
    pub server_type: &'a str,
    pub image: &'a str,
    pub location: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<&'a str>,
    pub start_after_create: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub firewalls: Vec<FirewallRef>,
}

#[derive(Debug, Serialize)]
pub struct FirewallRef {
    pub firewall: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateVolume<'a> {
    pub name: &'a str,
    pub size: u32,
    pub location: &'a str,
    pub format: &'a str,
}
