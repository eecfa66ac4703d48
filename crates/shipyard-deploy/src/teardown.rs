//! `shipyard delete`
//!
//! Removes everything a deploy created, in reverse dependency order. Nothing
//! here stops early: each failure is recorded in the returned [`BestEffort`]
//! and the next resource is still attempted.

use crate::env::DeployEnv;
use crate::reconcile::plan_servers;
use crate::tunnels::plan_tunnels;
use crate::volume::{VolumePlan, plan_volumes};
use shipyard_cloud::{BestEffort, CloudError, pause};
use tracing::{info, instrument, warn};

/// Lookups that fail because the resource is gone count as "nothing to do"
fn absent(err: &CloudError) -> bool {
    matches!(
        err,
        CloudError::NotFound(_) | CloudError::Firewall(_) | CloudError::Network(_)
    )
}

pub struct Teardown<'a> {
    env: &'a DeployEnv,
}

impl<'a> Teardown<'a> {
    pub fn new(env: &'a DeployEnv) -> Self {
        Self { env }
    }

    #[instrument(skip(self), fields(app = %self.env.config.application.name))]
    pub async fn run(&self) -> BestEffort {
        let mut report = BestEffort::new();
        let volumes = plan_volumes(&self.env.config);

        for plan in &volumes {
            report.merge(self.detach_volume(plan).await);
        }
        report.merge(self.delete_servers().await);
        for plan in &volumes {
            report.merge(self.delete_volume(plan).await);
        }
        report.merge(self.delete_firewall().await);
        report.merge(self.delete_network().await);
        report.merge(self.remove_tunnels().await);

        if report.is_clean() {
            info!("Teardown complete");
        } else {
            warn!(failures = report.failures().len(), "Teardown finished with failures");
        }
        report
    }

    /// Unmount on the host, drop the fstab entry, then detach
    async fn detach_volume(&self, plan: &VolumePlan) -> BestEffort {
        let mut report = BestEffort::new();
        let provider = &self.env.provider;
        let operation = format!("detach volume {}", plan.name);

        let Some(Some(volume)) = report.record(&operation, provider.get_volume_by_name(&plan.name).await)
        else {
            return report;
        };
        let Some(server_id) = volume.server_id.clone() else {
            return report;
        };

        let server = report
            .record(&operation, provider.find_server_by_id(&server_id).await)
            .flatten();
        if let Some(ip) = server.as_ref().and_then(|s| s.public_ipv4.as_deref()) {
            let exec = self.env.connector.connect(ip);
            let unmount = exec
                .execute(&format!(
                    "mountpoint -q {p} && sudo umount {p} || true",
                    p = plan.mount_path
                ))
                .await;
            report.record(format!("unmount {}", plan.mount_path), unmount);
            let fstab = exec
                .execute(&format!("sudo sed -i '\\|{}|d' /etc/fstab", plan.mount_path))
                .await;
            report.record(format!("remove fstab entry for {}", plan.mount_path), fstab);
        }

        if report
            .record(&operation, provider.detach_volume(&volume.id).await)
            .is_some()
        {
            info!(volume = %plan.name, "Volume detached");
        }
        report
    }

    async fn delete_servers(&self) -> BestEffort {
        let mut report = BestEffort::new();
        let provider = &self.env.provider;

        for slot in plan_servers(&self.env.config) {
            let operation = format!("delete server {}", slot.name);
            let Some(Some(server)) = report.record(&operation, provider.find_server(&slot.name).await)
            else {
                continue;
            };
            if let Some(detach_failures) = report.record(&operation, provider.delete_server(&server.id).await) {
                report.merge(detach_failures);
                info!(server = %slot.name, "Server deleted");
            }
        }
        report
    }

    async fn delete_volume(&self, plan: &VolumePlan) -> BestEffort {
        let mut report = BestEffort::new();
        let provider = &self.env.provider;
        let operation = format!("delete volume {}", plan.name);

        if let Some(Some(volume)) = report.record(&operation, provider.get_volume_by_name(&plan.name).await)
            && report
                .record(&operation, provider.delete_volume(&volume.id).await)
                .is_some()
        {
            info!(volume = %plan.name, "Volume deleted");
        }
        report
    }

    /// A firewall can stay referenced for a few seconds after its servers go
    async fn delete_firewall(&self) -> BestEffort {
        let mut report = BestEffort::new();
        let provider = &self.env.provider;
        let name = self.env.namer().firewall_name();
        let operation = format!("delete firewall {}", name);

        let firewall = match provider.get_firewall_by_name(&name).await {
            Ok(firewall) => firewall,
            Err(e) if absent(&e) => return report,
            Err(e) => {
                report.record(&operation, Err::<(), _>(e));
                return report;
            }
        };

        let policy = self.env.policy.firewall_delete;
        let mut attempt = 1;
        loop {
            match provider.delete_firewall(&firewall.id).await {
                Ok(()) => {
                    info!(firewall = %name, "Firewall deleted");
                    break;
                }
                Err(e) if attempt >= policy.max_attempts => {
                    report.record(&operation, Err::<(), _>(e));
                    break;
                }
                Err(e) => {
                    warn!(firewall = %name, attempt, error = %e, "Firewall still in use, retrying");
                    if !pause(policy.interval, &self.env.cancel).await {
                        report.record(&operation, Err::<(), _>(CloudError::Cancelled(operation.clone())));
                        break;
                    }
                    attempt += 1;
                }
            }
        }
        report
    }

    async fn delete_network(&self) -> BestEffort {
        let mut report = BestEffort::new();
        let provider = &self.env.provider;
        let name = self.env.namer().network_name();
        let operation = format!("delete network {}", name);

        match provider.get_network_by_name(&name).await {
            Ok(network) => {
                if report
                    .record(&operation, provider.delete_network(&network.id).await)
                    .is_some()
                {
                    info!(network = %name, "Network deleted");
                }
            }
            Err(e) if absent(&e) => {}
            Err(e) => {
                report.record(&operation, Err::<(), _>(e));
            }
        }
        report
    }

    async fn remove_tunnels(&self) -> BestEffort {
        let mut report = BestEffort::new();
        let requests = plan_tunnels(&self.env.config);
        if requests.is_empty() {
            return report;
        }
        let Some(tunnels) = &self.env.tunnels else {
            warn!("Apps declare a domain but no tunnel provider is configured; tunnels left in place");
            return report;
        };

        for request in &requests {
            report.merge(
                tunnels
                    .remove_tunnel(&request.tunnel_name, &request.hostname, &request.domain)
                    .await,
            );
            info!(hostname = %request.hostname, "Tunnel removed");
        }
        report
    }
}
