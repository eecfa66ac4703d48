use super::master_exec;
use crate::context::RunContext;
use crate::env::DeployEnv;
use crate::error::{DeploymentError, Result, StepResultExt};
use crate::image::ImageRequest;
use crate::lock::DeployLock;
use crate::pipeline::Step;
use crate::retention::cleanup_images;
use crate::verify::TrafficVerifier;
use crate::workloads::WorkloadDeployer;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

const TAG_FORMAT: &str = "%Y%m%d%H%M%S";

fn deploy_lock(env: &DeployEnv) -> DeployLock {
    DeployLock::new(env.namer().lock_path(), env.policy.lock_stale_after)
}

pub struct AcquireLock;

#[async_trait]
impl Step for AcquireLock {
    fn name(&self) -> &'static str {
        "lock"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let exec = master_exec(env, ctx, self.name())?;
        deploy_lock(env)
            .acquire(exec.as_ref(), Utc::now().timestamp(), self.name())
            .await?;
        ctx.lock_held = true;
        Ok(())
    }
}

/// Registered with [`crate::pipeline::Pipeline::finally`]; a no-op unless
/// this run took the lock
pub struct ReleaseLock;

#[async_trait]
impl Step for ReleaseLock {
    fn name(&self) -> &'static str {
        "release lock"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        if !ctx.lock_held {
            return Ok(());
        }
        let exec = master_exec(env, ctx, self.name())?;
        deploy_lock(env).release(exec.as_ref()).await;
        ctx.lock_held = false;
        Ok(())
    }
}

pub struct BuildImage;

#[async_trait]
impl Step for BuildImage {
    fn name(&self) -> &'static str {
        "build image"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let exec = master_exec(env, ctx, self.name())?;
        let request = ImageRequest {
            repository: env.namer().image_repository(),
            tag: Utc::now().format(TAG_FORMAT).to_string(),
        };
        let reference = env
            .builder
            .build_and_push(exec.as_ref(), &request)
            .await
            .at(self.name())?;
        info!(image = %reference, "Image ready");
        ctx.image_tag = Some(request.tag);
        Ok(())
    }
}

pub struct DeployDatabase;

#[async_trait]
impl Step for DeployDatabase {
    fn name(&self) -> &'static str {
        "deploy database"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let exec = master_exec(env, ctx, self.name())?;
        let deployer = WorkloadDeployer::new(
            exec.as_ref(),
            &env.config,
            &env.manifests,
            env.policy.rollout_timeout_secs,
        );
        if !deployer.deploy_database(self.name()).await? {
            info!("No database workload to deploy");
        }
        Ok(())
    }
}

pub struct DeployServices;

#[async_trait]
impl Step for DeployServices {
    fn name(&self) -> &'static str {
        "deploy services"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let exec = master_exec(env, ctx, self.name())?;
        let deployer = WorkloadDeployer::new(
            exec.as_ref(),
            &env.config,
            &env.manifests,
            env.policy.rollout_timeout_secs,
        );
        let count = deployer.deploy_services(self.name()).await?;
        info!(count, "Services deployed");
        Ok(())
    }
}

/// Secrets, every app, then one tunnel connector per public app
pub struct DeployApps;

#[async_trait]
impl Step for DeployApps {
    fn name(&self) -> &'static str {
        "deploy apps"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let step = self.name();
        let exec = master_exec(env, ctx, step)?;
        let image = env.namer().registry_image(ctx.image_tag().at(step)?);
        let deployer = WorkloadDeployer::new(
            exec.as_ref(),
            &env.config,
            &env.manifests,
            env.policy.rollout_timeout_secs,
        );

        deployer.deploy_app_secrets(step).await?;
        for (service, app) in &env.config.application.app {
            if env.cancel.is_cancelled() {
                return Err(DeploymentError::cancelled(step));
            }
            deployer.deploy_app(service, app, &image, step).await?;
        }
        for tunnel in &ctx.tunnels {
            deployer.deploy_cloudflared(tunnel, step).await?;
        }
        Ok(())
    }
}

/// Every public hostname must answer its health path several times in a row
pub struct VerifyTraffic;

#[async_trait]
impl Step for VerifyTraffic {
    fn name(&self) -> &'static str {
        "verify traffic"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        if ctx.tunnels.is_empty() {
            info!("No public hostnames to verify");
            return Ok(());
        }

        let verifier = TrafficVerifier::new(env.probe.as_ref(), env.policy.traffic, env.cancel.clone());
        for tunnel in &ctx.tunnels {
            let path = env
                .config
                .application
                .app
                .get(&tunnel.service_name)
                .map(|app| app.health_path())
                .unwrap_or(shipyard_core::config::DEFAULT_HEALTH_PATH);
            let url = format!("https://{}{}", tunnel.hostname, path);
            let attempt = verifier.verify(&url).await.at(self.name())?;
            info!(url = %url, attempt, "Traffic verified");
        }
        Ok(())
    }
}

pub struct CleanupImages;

#[async_trait]
impl Step for CleanupImages {
    fn name(&self) -> &'static str {
        "cleanup images"
    }

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()> {
        let step = self.name();
        let exec = master_exec(env, ctx, step)?;
        let removed = cleanup_images(
            exec.as_ref(),
            &env.namer().image_repository(),
            env.config.application.retained_images(),
            ctx.image_tag().at(step)?,
        )
        .await;
        info!(removed, "Old images removed");
        Ok(())
    }
}
