use super::master_exec;
use crate::context::RunContext;
use crate::env::DeployEnv;
use crate::error::{DeploymentError, Result, StepResultExt};
use crate::pipeline::Step;
use crate::tunnels::plan_tunnels;
use async_trait::async_trait;
use shipyard_cluster::Bootstrapper;
use tracing::{info, warn};

/// Control plane on the master, then every worker in turn
pub struct BootstrapCluster;

#[async_trait]
impl Step for BootstrapCluster {
    fn name(&self) -> &'static str {
        "bootstrap cluster"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let step = self.name();
        let bootstrapper = Bootstrapper::new(&env.manifests, env.config.ssh.user.clone(), env.cancel.clone())
            .with_policy(env.policy.bootstrap);

        let master_exec = master_exec(env, ctx, step)?;
        let master_server = ctx.master_server().at(step)?;
        let master = bootstrapper
            .bootstrap_master(master_exec.as_ref(), master_server.name(), &master_server.group)
            .await
            .at(step)?;
        info!(master = %master.name, private_ip = %master.private_ip, "Control plane ready");

        let mut workers = Vec::new();
        for worker in ctx.workers() {
            let ip = worker.public_ip().at(step)?;
            workers.push((worker.name().to_string(), worker.group.clone(), ip.to_string()));
        }

        // The join token is only known once the master is up
        let mut skipped = Vec::new();
        for (name, group, ip) in workers {
            let exec = env.connector.connect(&ip);
            bootstrapper
                .bootstrap_worker(exec.as_ref(), &name, &master)
                .await
                .at(step)?;
            if !bootstrapper
                .await_worker_join(master_exec.as_ref(), &name, &group)
                .await
                .at(step)?
            {
                warn!(worker = %name, "Skipping worker that did not join");
                skipped.push(name);
            }
        }

        ctx.master = Some(master);
        ctx.skipped_workers = skipped;
        Ok(())
    }
}

/// Public tunnels and DNS for apps with a domain
pub struct ConfigureTunnels;

#[async_trait]
impl Step for ConfigureTunnels {
    fn name(&self) -> &'static str {
        "configure tunnels"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let step = self.name();
        let requests = plan_tunnels(&env.config);
        if requests.is_empty() {
            info!("No public apps, skipping tunnels");
            return Ok(());
        }
        let Some(tunnels) = &env.tunnels else {
            return Err(DeploymentError::new(
                step,
                "apps declare a domain but no tunnel provider is configured",
            ));
        };

        let mut infos = Vec::with_capacity(requests.len());
        for request in &requests {
            let info = tunnels
                .ensure_tunnel(request, &env.cancel)
                .await
                .at(step)?;
            info!(hostname = %info.hostname, tunnel = %info.tunnel_id, "Tunnel ready");
            infos.push(info);
        }
        ctx.tunnels = infos;
        Ok(())
    }
}
