//! In-memory provider and tunnel fakes
//!
//! Both honor the same find-before-create contract as the real adapters, so
//! pipeline tests can run a deploy twice and assert nothing was duplicated.

use crate::error::{CloudError, Result};
use crate::poll::{PollPolicy, poll};
use crate::provider::CloudProvider;
use crate::resource::{
    Firewall, Network, Server, ServerCreateOptions, ServerStatus, Volume, VolumeCreateOptions,
};
use crate::teardown::BestEffort;
use crate::tunnel::{TunnelInfo, TunnelProvider, TunnelRequest};
use async_trait::async_trait;
use shipyard_remote::RemoteExecutor;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    next_id: u32,
    networks: Vec<Network>,
    firewalls: Vec<Firewall>,
    servers: Vec<Server>,
    volumes: Vec<Volume>,
    calls: Vec<String>,
    failing: HashSet<String>,
    /// Servers created while this is > 0 start out pending for that many polls
    boot_polls: u32,
    booting: BTreeMap<String, u32>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

/// Cloud provider backed by a `Mutex<State>`
///
/// Public addresses come from 203.0.113.0/24, private ones from 10.0.1.0/24.
pub struct InMemoryProvider {
    name: String,
    state: Mutex<State>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make every call to `operation` fail with a 500
    pub fn fail_on(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    /// New servers report `pending` for `polls` lookups before they run
    pub fn boot_after(&self, polls: u32) {
        self.state().boot_polls = polls;
    }

    /// Every call so far as `operation:argument`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{}:", operation);
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn networks(&self) -> Vec<Network> {
        self.state().networks.clone()
    }

    pub fn firewalls(&self) -> Vec<Firewall> {
        self.state().firewalls.clone()
    }

    pub fn servers(&self) -> Vec<Server> {
        self.state().servers.clone()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.state().volumes.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, operation: &str, arg: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(format!("{}:{}", operation, arg));
        if state.failing.contains(operation) {
            return Err(CloudError::Api {
                status: 500,
                message: format!("injected failure: {}", operation),
            });
        }
        Ok(state)
    }

    fn lookup_server(state: &mut State, id: &str) -> Option<Server> {
        let server = state.servers.iter().find(|s| s.id == id)?.clone();
        match state.booting.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(Server {
                    status: ServerStatus::Pending,
                    public_ipv4: None,
                    ..server
                })
            }
            _ => Some(server),
        }
    }
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_or_create_network(&self, name: &str) -> Result<Network> {
        let mut state = self.enter("find_or_create_network", name)?;
        if let Some(existing) = state.networks.iter().find(|n| n.name == name) {
            return Ok(existing.clone());
        }
        let network = Network {
            id: state.next_id(),
            name: name.to_string(),
            ip_range: Some("10.0.0.0/16".to_string()),
        };
        state.networks.push(network.clone());
        Ok(network)
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        let state = self.enter("get_network_by_name", name)?;
        state
            .networks
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| CloudError::Network(format!("network not found: {}", name)))
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        let mut state = self.enter("delete_network", id)?;
        let before = state.networks.len();
        state.networks.retain(|n| n.id != id);
        if state.networks.len() == before {
            return Err(CloudError::NotFound(format!("network {}", id)));
        }
        Ok(())
    }

    async fn find_or_create_firewall(&self, name: &str) -> Result<Firewall> {
        let mut state = self.enter("find_or_create_firewall", name)?;
        if let Some(existing) = state.firewalls.iter().find(|f| f.name == name) {
            return Ok(existing.clone());
        }
        let firewall = Firewall {
            id: state.next_id(),
            name: name.to_string(),
        };
        state.firewalls.push(firewall.clone());
        Ok(firewall)
    }

    async fn get_firewall_by_name(&self, name: &str) -> Result<Firewall> {
        let state = self.enter("get_firewall_by_name", name)?;
        state
            .firewalls
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| CloudError::Firewall(format!("firewall not found: {}", name)))
    }

    async fn delete_firewall(&self, id: &str) -> Result<()> {
        let mut state = self.enter("delete_firewall", id)?;
        let before = state.firewalls.len();
        state.firewalls.retain(|f| f.id != id);
        if state.firewalls.len() == before {
            return Err(CloudError::NotFound(format!("firewall {}", id)));
        }
        Ok(())
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        let mut state = self.enter("find_server", name)?;
        let id = state
            .servers
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id.clone());
        Ok(id.and_then(|id| Self::lookup_server(&mut state, &id)))
    }

    async fn find_server_by_id(&self, id: &str) -> Result<Option<Server>> {
        let mut state = self.enter("find_server_by_id", id)?;
        Ok(Self::lookup_server(&mut state, id))
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let state = self.enter("list_servers", "")?;
        Ok(state.servers.clone())
    }

    async fn create_server(&self, opts: &ServerCreateOptions) -> Result<Server> {
        let mut state = self.enter("create_server", &opts.name)?;
        if let Some(existing) = state.servers.iter().find(|s| s.name == opts.name) {
            return Ok(existing.clone());
        }

        let id = state.next_id();
        let n = state.servers.len() + 2;
        let server = Server {
            id: id.clone(),
            name: opts.name.clone(),
            status: ServerStatus::Running,
            public_ipv4: Some(format!("203.0.113.{}", n)),
            private_ipv4: opts.network_id.as_ref().map(|_| format!("10.0.1.{}", n)),
        };
        if state.boot_polls > 0 {
            let polls = state.boot_polls;
            state.booting.insert(id, polls);
        }
        state.servers.push(server.clone());
        Ok(server)
    }

    async fn wait_for_server(
        &self,
        id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Server> {
        let found = poll(
            PollPolicy::secs(max_attempts, 10),
            "server",
            cancel,
            || async move {
                let mut state = self.enter("wait_for_server", id)?;
                Ok::<_, CloudError>(Self::lookup_server(&mut state, id).filter(Server::is_ready))
            },
        )
        .await;

        found.map_err(|e| match CloudError::from(e) {
            CloudError::Timeout { attempts, .. } => CloudError::ServerCreation(format!(
                "server {} did not become running after {} attempts",
                id, attempts
            )),
            other => other,
        })
    }

    async fn delete_server(&self, id: &str) -> Result<BestEffort> {
        let mut state = self.enter("delete_server", id)?;
        let before = state.servers.len();
        state.servers.retain(|s| s.id != id);
        if state.servers.len() == before {
            return Err(CloudError::NotFound(format!("server {}", id)));
        }
        for volume in state.volumes.iter_mut() {
            if volume.is_attached_to(id) {
                volume.server_id = None;
                volume.device_path = None;
            }
        }
        Ok(BestEffort::new())
    }

    async fn create_volume(&self, opts: &VolumeCreateOptions) -> Result<Volume> {
        let mut state = self.enter("create_volume", &opts.name)?;
        if let Some(existing) = state.volumes.iter().find(|v| v.name == opts.name) {
            return Ok(existing.clone());
        }
        if !state.servers.iter().any(|s| s.id == opts.server_id) {
            return Err(CloudError::Volume(format!(
                "server {} not found for volume {}",
                opts.server_id, opts.name
            )));
        }
        let volume = Volume {
            id: state.next_id(),
            name: opts.name.clone(),
            size_gb: opts.size_gb,
            location: Some("memory-1".to_string()),
            status: "available".to_string(),
            server_id: None,
            device_path: None,
        };
        state.volumes.push(volume.clone());
        Ok(volume)
    }

    async fn get_volume(&self, id: &str) -> Result<Option<Volume>> {
        let state = self.enter("get_volume", id)?;
        Ok(state.volumes.iter().find(|v| v.id == id).cloned())
    }

    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        let state = self.enter("get_volume_by_name", name)?;
        Ok(state.volumes.iter().find(|v| v.name == name).cloned())
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        let mut state = self.enter("delete_volume", id)?;
        match state.volumes.iter().position(|v| v.id == id) {
            Some(i) if state.volumes[i].is_attached() => Err(CloudError::Volume(format!(
                "volume {} is still attached",
                id
            ))),
            Some(i) => {
                state.volumes.remove(i);
                Ok(())
            }
            None => Err(CloudError::NotFound(format!("volume {}", id))),
        }
    }

    async fn attach_volume(&self, volume_id: &str, server_id: &str) -> Result<()> {
        let mut state = self.enter("attach_volume", volume_id)?;
        if !state.servers.iter().any(|s| s.id == server_id) {
            return Err(CloudError::NotFound(format!("server {}", server_id)));
        }
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {}", volume_id)))?;

        if volume.is_attached_to(server_id) {
            return Ok(());
        }
        if volume.is_attached() {
            return Err(CloudError::Volume(format!(
                "volume {} is attached to another server",
                volume_id
            )));
        }
        volume.server_id = Some(server_id.to_string());
        volume.status = "in-use".to_string();
        volume.device_path = Some(format!("/dev/disk/by-id/scsi-0HC_Volume_{}", volume_id));
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        let mut state = self.enter("detach_volume", volume_id)?;
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {}", volume_id)))?;
        volume.server_id = None;
        volume.device_path = None;
        volume.status = "available".to_string();
        Ok(())
    }

    async fn wait_for_device_path(
        &self,
        volume_id: &str,
        _remote: &dyn RemoteExecutor,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let state = self.enter("wait_for_device_path", volume_id)?;
        Ok(state
            .volumes
            .iter()
            .find(|v| v.id == volume_id)
            .and_then(|v| v.device_path.clone()))
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.enter("validate_credentials", "").map(|_| ())
    }

    async fn validate_instance_type(&self, instance_type: &str) -> Result<()> {
        self.enter("validate_instance_type", instance_type)
            .map(|_| ())
    }

    async fn validate_region(&self, region: &str) -> Result<()> {
        self.enter("validate_region", region).map(|_| ())
    }
}

#[derive(Default)]
struct TunnelState {
    next_id: u32,
    /// tunnel name -> id
    tunnels: BTreeMap<String, String>,
    /// hostname -> CNAME target
    records: BTreeMap<String, String>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

/// Tunnel provider that keeps tunnels and DNS records in maps
#[derive(Default)]
pub struct InMemoryTunnels {
    state: Mutex<TunnelState>,
}

impl InMemoryTunnels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    pub fn tunnel_names(&self) -> Vec<String> {
        self.state().tunnels.keys().cloned().collect()
    }

    /// CNAME target for `hostname`, if a record exists
    pub fn record(&self, hostname: &str) -> Option<String> {
        self.state().records.get(hostname).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, TunnelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TunnelProvider for InMemoryTunnels {
    async fn ensure_tunnel(
        &self,
        request: &TunnelRequest,
        _cancel: &CancellationToken,
    ) -> Result<TunnelInfo> {
        let mut state = self.state();
        state.calls.push(format!("ensure_tunnel:{}", request.tunnel_name));
        if state.failing.contains("ensure_tunnel") {
            return Err(CloudError::Tunnel(format!(
                "injected failure for {}",
                request.tunnel_name
            )));
        }

        let tunnel_id = match state.tunnels.get(&request.tunnel_name) {
            Some(id) => id.clone(),
            None => {
                state.next_id += 1;
                let id = format!("tunnel-{}", state.next_id);
                state
                    .tunnels
                    .insert(request.tunnel_name.clone(), id.clone());
                id
            }
        };
        state.records.insert(
            request.hostname.clone(),
            format!("{}.cfargotunnel.com", tunnel_id),
        );

        Ok(TunnelInfo {
            service_name: request.service_name.clone(),
            hostname: request.hostname.clone(),
            tunnel_token: format!("token-{}", tunnel_id),
            tunnel_id,
        })
    }

    async fn remove_tunnel(&self, tunnel_name: &str, hostname: &str, _domain: &str) -> BestEffort {
        let mut report = BestEffort::new();
        let mut state = self.state();
        state.calls.push(format!("remove_tunnel:{}", tunnel_name));

        let dns = if state.failing.contains("remove_dns") {
            Err(CloudError::Dns(format!("injected failure for {}", hostname)))
        } else {
            state.records.remove(hostname);
            Ok(())
        };
        report.record(format!("delete DNS record {}", hostname), dns);

        state.tunnels.remove(tunnel_name);
        report
    }
}
