use crate::context::{ProvisionedServer, RunContext};
use crate::env::DeployEnv;
use crate::error::{DeploymentError, Result, StepResultExt};
use crate::pipeline::Step;
use crate::reconcile::{Reconciler, elect_master, plan_servers};
use crate::volume::{VolumeMounter, plan_volumes};
use async_trait::async_trait;
use shipyard_core::manifest::CloudInit;
use shipyard_core::naming::VOLUME_ROOT;
use std::collections::BTreeSet;
use tracing::info;

/// Credentials, instance types and locations, checked before anything is created
pub struct ValidateProvider;

#[async_trait]
impl Step for ValidateProvider {
    fn name(&self) -> &'static str {
        "validate provider"
    }

    async fn run(&self, env: &DeployEnv, _ctx: &mut RunContext) -> Result<()> {
        let provider = &env.provider;
        provider.validate_credentials().await.at(self.name())?;

        let groups = env.config.application.servers.values();
        let types: BTreeSet<String> = groups.clone().map(|g| env.config.server_type_for(g)).collect();
        let locations: BTreeSet<String> = groups.map(|g| env.config.location_for(g)).collect();

        for server_type in &types {
            provider
                .validate_instance_type(server_type)
                .await
                .at(self.name())?;
        }
        for location in &locations {
            provider.validate_region(location).await.at(self.name())?;
        }
        info!(provider = provider.name(), "Provider configuration valid");
        Ok(())
    }
}

pub struct ProvisionNetwork;

#[async_trait]
impl Step for ProvisionNetwork {
    fn name(&self) -> &'static str {
        "provision network"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let (network, firewall) = Reconciler::new(env)
            .network_and_firewall()
            .await
            .at(self.name())?;
        ctx.network = Some(network);
        ctx.firewall = Some(firewall);
        Ok(())
    }
}

pub struct ProvisionServers;

#[async_trait]
impl Step for ProvisionServers {
    fn name(&self) -> &'static str {
        "provision servers"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let step = self.name();
        let slots = plan_servers(&env.config);
        let master = elect_master(&env.config, &slots)
            .ok_or_else(|| DeploymentError::new(step, "no server groups are configured"))?
            .name
            .clone();

        let user_data = env
            .manifests
            .cloud_init(&CloudInit {
                user: env.config.ssh.user.clone(),
                ssh_public_key: env.ssh_public_key.clone(),
                volume_root: VOLUME_ROOT.to_string(),
            })
            .at(step)?;

        let network = ctx.network().at(step)?.clone();
        let firewall = ctx.firewall().at(step)?.clone();
        let reconciler = Reconciler::new(env);

        let mut servers = Vec::with_capacity(slots.len());
        for slot in &slots {
            let server = reconciler
                .server(slot, &network, &firewall, &user_data)
                .await
                .at(step)?;
            servers.push(ProvisionedServer {
                group: slot.group.clone(),
                index: slot.index,
                server,
            });
        }

        ctx.servers = servers;
        ctx.master_server = Some(master);
        let ip = ctx.main_server_ip().at(step)?;
        info!(master = ?ctx.master_server, ip = %ip, "Main server elected");
        Ok(())
    }
}

pub struct ProvisionVolumes;

#[async_trait]
impl Step for ProvisionVolumes {
    fn name(&self) -> &'static str {
        "provision volumes"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let step = self.name();
        let plans = plan_volumes(&env.config);
        if plans.is_empty() {
            info!("No volumes declared");
            return Ok(());
        }

        let mounter = VolumeMounter::new(env);
        for plan in &plans {
            let server = ctx.server(&plan.server_name).ok_or_else(|| {
                DeploymentError::new(
                    step,
                    format!("volume {} belongs to unknown server {}", plan.name, plan.server_name),
                )
            })?;
            mounter.provision(plan, &server.server).await.at(step)?;
        }
        Ok(())
    }
}

