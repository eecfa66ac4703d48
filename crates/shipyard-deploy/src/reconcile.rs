//! Find-or-create reconciliation of network, firewall and servers
//!
//! Names are derived from the configuration, so every lookup on a rerun
//! finds what an earlier run created instead of creating a duplicate.

use crate::env::{DEFAULT_IMAGE, DeployEnv};
use shipyard_cloud::{
    CloudError, Firewall, Network, PollError, Result, Server, ServerCreateOptions, poll,
};
use shipyard_core::DeployConfig;
use tracing::{debug, info, instrument};

/// One `(group, index)` position of the server topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSlot {
    pub group: String,
    pub index: u32,
    pub name: String,
    pub server_type: String,
    pub location: String,
}

/// Every server the configuration asks for, groups in name order
pub fn plan_servers(config: &DeployConfig) -> Vec<ServerSlot> {
    let namer = config.namer();
    config
        .application
        .servers
        .iter()
        .flat_map(|(group, spec)| {
            let server_type = config.server_type_for(spec);
            let location = config.location_for(spec);
            let namer = &namer;
            (1..=spec.count.max(1)).map(move |index| ServerSlot {
                group: group.clone(),
                index,
                name: namer.server_name(group, index),
                server_type: server_type.clone(),
                location: location.clone(),
            })
        })
        .collect()
}

/// The control-plane server: first of the master group, else first overall
pub fn elect_master<'a>(config: &DeployConfig, slots: &'a [ServerSlot]) -> Option<&'a ServerSlot> {
    match config.master_group() {
        Some(group) => slots.iter().find(|s| s.group == group && s.index == 1),
        None => slots.first(),
    }
}

pub struct Reconciler<'a> {
    env: &'a DeployEnv,
}

impl<'a> Reconciler<'a> {
    pub fn new(env: &'a DeployEnv) -> Self {
        Self { env }
    }

    pub async fn network_and_firewall(&self) -> Result<(Network, Firewall)> {
        let namer = self.env.namer();
        let provider = &self.env.provider;

        let network = provider
            .find_or_create_network(&namer.network_name())
            .await?;
        info!(network = %network.name, id = %network.id, "Network ready");

        let firewall = provider
            .find_or_create_firewall(&namer.firewall_name())
            .await?;
        info!(firewall = %firewall.name, id = %firewall.id, "Firewall ready");

        Ok((network, firewall))
    }

    /// Find the server for `slot`, or create it and wait until it accepts SSH
    #[instrument(skip(self, slot, user_data), fields(server = %slot.name))]
    pub async fn server(
        &self,
        slot: &ServerSlot,
        network: &Network,
        firewall: &Firewall,
        user_data: &str,
    ) -> Result<Server> {
        let provider = &self.env.provider;

        if let Some(existing) = provider.find_server(&slot.name).await? {
            info!(
                ip = existing.public_ipv4.as_deref().unwrap_or("-"),
                "Server already exists"
            );
            return Ok(existing);
        }

        let opts = ServerCreateOptions {
            name: slot.name.clone(),
            server_type: slot.server_type.clone(),
            image: DEFAULT_IMAGE.to_string(),
            location: slot.location.clone(),
            user_data: Some(user_data.to_string()),
            network_id: Some(network.id.clone()),
            firewall_id: Some(firewall.id.clone()),
        };
        let created = provider.create_server(&opts).await?;
        info!(id = %created.id, "Server created, waiting for it to run");

        let server = provider
            .wait_for_server(
                &created.id,
                self.env.policy.server_ready_attempts,
                &self.env.cancel,
            )
            .await?;
        let ip = server
            .public_ipv4
            .clone()
            .ok_or_else(|| CloudError::ServerCreation(format!("{} has no public address", slot.name)))?;
        info!(ip = %ip, "Server running");

        self.wait_for_ssh(&ip).await?;
        Ok(server)
    }

    pub async fn wait_for_ssh(&self, ip: &str) -> Result<()> {
        info!(host = %ip, "Waiting for SSH");
        let exec = self.env.connector.connect(ip);
        let what = format!("ssh on {}", ip);

        poll(self.env.policy.ssh_ready, &what, &self.env.cancel, || {
            let exec = exec.clone();
            async move {
                match exec.execute("echo ready").await {
                    Ok(out) if out.trim() == "ready" => Ok(Some(())),
                    Ok(_) => Ok(None),
                    Err(e) => {
                        debug!(error = %e, "SSH not ready");
                        Ok(None)
                    }
                }
            }
        })
        .await
        .map_err(|e: PollError<CloudError>| CloudError::from(e))?;

        info!(host = %ip, "SSH ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(servers: &str) -> DeployConfig {
        let text = format!(
            "application:\n  name: myapp\n  servers:\n{}\nprovider:\n  hetzner: {{ server_type: cx22, server_location: fsn1 }}\n",
            servers
        );
        DeployConfig::parse(&text, Path::new("shipyard.yaml")).unwrap()
    }

    #[test]
    fn test_plan_expands_counts() {
        let config = config(
            "    master: { master: true }\n    workers: { count: 2, type: cx32 }",
        );
        let slots = plan_servers(&config);
        let names: Vec<&str> = slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["myapp-master-1", "myapp-workers-1", "myapp-workers-2"]
        );
        assert_eq!(slots[0].server_type, "cx22");
        assert_eq!(slots[1].server_type, "cx32");
        assert_eq!(slots[1].location, "fsn1");
    }

    #[test]
    fn test_flagged_group_wins_election() {
        let config = config("    a: { count: 2 }\n    b: { count: 1, master: true }");
        let slots = plan_servers(&config);
        assert_eq!(elect_master(&config, &slots).unwrap().name, "myapp-b-1");
    }

    #[test]
    fn test_single_group_elects_its_first_server() {
        let config = config("    web: { count: 3 }");
        let slots = plan_servers(&config);
        assert_eq!(elect_master(&config, &slots).unwrap().name, "myapp-web-1");
    }
}
