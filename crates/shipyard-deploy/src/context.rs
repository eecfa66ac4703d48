//! Values discovered while a pipeline runs
//!
//! The configuration never changes during a run. Whatever a step learns from
//! the provider or the cluster (IDs, addresses, the join token) lands here,
//! and later steps read it back through the accessors.

use crate::error::MissingContext;
use shipyard_cloud::{Firewall, Network, Server, TunnelInfo};
use shipyard_cluster::MasterNode;

/// A server together with the group slot it fills
#[derive(Debug, Clone)]
pub struct ProvisionedServer {
    pub group: String,
    pub index: u32,
    pub server: Server,
}

impl ProvisionedServer {
    pub fn name(&self) -> &str {
        &self.server.name
    }

    pub fn public_ip(&self) -> Result<&str, MissingContext> {
        self.server
            .public_ipv4
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .ok_or(MissingContext("server public address"))
    }
}

#[derive(Debug, Default)]
pub struct RunContext {
    pub network: Option<Network>,
    pub firewall: Option<Firewall>,
    /// In provisioning order: groups by name, then index
    pub servers: Vec<ProvisionedServer>,
    /// Name of the elected control-plane server
    pub master_server: Option<String>,
    pub master: Option<MasterNode>,
    /// Workers that never registered with the control plane
    pub skipped_workers: Vec<String>,
    pub tunnels: Vec<TunnelInfo>,
    /// Timestamp tag of the image built in this run
    pub image_tag: Option<String>,
    pub lock_held: bool,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(&self) -> Result<&Network, MissingContext> {
        self.network.as_ref().ok_or(MissingContext("network"))
    }

    pub fn firewall(&self) -> Result<&Firewall, MissingContext> {
        self.firewall.as_ref().ok_or(MissingContext("firewall"))
    }

    pub fn server(&self, name: &str) -> Option<&ProvisionedServer> {
        self.servers.iter().find(|s| s.name() == name)
    }

    pub fn master_server(&self) -> Result<&ProvisionedServer, MissingContext> {
        self.master_server
            .as_deref()
            .and_then(|name| self.server(name))
            .ok_or(MissingContext("master server"))
    }

    /// Public address commands against the cluster go to
    pub fn main_server_ip(&self) -> Result<&str, MissingContext> {
        self.master_server()?.public_ip()
    }

    /// Every provisioned server except the master
    pub fn workers(&self) -> impl Iterator<Item = &ProvisionedServer> {
        let master = self.master_server.clone();
        self.servers
            .iter()
            .filter(move |s| Some(s.name()) != master.as_deref())
    }

    pub fn master(&self) -> Result<&MasterNode, MissingContext> {
        self.master.as_ref().ok_or(MissingContext("cluster master"))
    }

    pub fn image_tag(&self) -> Result<&str, MissingContext> {
        self.image_tag.as_deref().ok_or(MissingContext("image tag"))
    }

    pub fn tunnel_for(&self, service: &str) -> Option<&TunnelInfo> {
        self.tunnels.iter().find(|t| t.service_name == service)
    }
}
