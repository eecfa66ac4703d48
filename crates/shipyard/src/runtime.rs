//! Wiring from a config file to a ready [`DeployEnv`]

use anyhow::{Context, Result, bail};
use shipyard_cloud::{CloudProvider, TunnelProvider};
use shipyard_cloud_cloudflare::CloudflareTunnels;
use shipyard_cloud_hetzner::HetznerProvider;
use shipyard_cloud_scaleway::ScalewayProvider;
use shipyard_core::{DeployConfig, Manifests, ProviderCredentials};
use shipyard_deploy::{DeployEnv, DeployPolicy, RemoteDockerBuilder, ReqwestProbe};
use shipyard_remote::{SshConfig, SshConnector};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub fn load_config(path: &Path, branch: Option<&str>) -> Result<DeployConfig> {
    let config = DeployConfig::load(path)?;
    match branch {
        Some(branch) => Ok(config.with_branch(branch)?),
        None => Ok(config),
    }
}

pub async fn build_provider(config: &DeployConfig) -> Result<Arc<dyn CloudProvider>> {
    let credentials = config.provider_credentials()?;
    debug!(?credentials, "Resolved provider credentials");

    let provider: Arc<dyn CloudProvider> = match credentials {
        ProviderCredentials::Hetzner { token } => Arc::new(HetznerProvider::new(token)),
        ProviderCredentials::Scaleway {
            secret_key,
            project_id,
            zone,
        } => Arc::new(ScalewayProvider::new(secret_key, project_id, zone)),
        #[cfg(feature = "aws")]
        ProviderCredentials::Aws {
            access_key_id,
            secret_access_key,
            region,
        } => Arc::new(
            shipyard_cloud_aws::AwsProvider::connect(access_key_id, secret_access_key, Some(region))
                .await,
        ),
        #[cfg(not(feature = "aws"))]
        ProviderCredentials::Aws { .. } => {
            bail!("this build of shipyard was compiled without AWS support (feature `aws`)")
        }
    };
    Ok(provider)
}

/// Only needed when some app is published under a domain
pub fn build_tunnels(config: &DeployConfig) -> Result<Option<Arc<dyn TunnelProvider>>> {
    if config.tunneled_apps().next().is_none() {
        return Ok(None);
    }
    let credentials = config
        .cloudflare_credentials()
        .context("apps declare a domain, so Cloudflare credentials are required")?;
    Ok(Some(Arc::new(CloudflareTunnels::new(
        credentials.api_token,
        credentials.account_id,
    ))))
}

pub async fn build_env(
    config: DeployConfig,
    build_dir: &Path,
    cancel: CancellationToken,
) -> Result<DeployEnv> {
    if !build_dir.is_dir() {
        bail!("build context {} is not a directory", build_dir.display());
    }

    let provider = build_provider(&config).await?;
    let tunnels = build_tunnels(&config)?;
    let ssh = SshConfig::new(config.ssh.user.clone(), config.ssh.private_key_path()?);
    let ssh_public_key = config.ssh.read_public_key()?;
    let policy = DeployPolicy::default();
    let probe = ReqwestProbe::new(policy.traffic.request_timeout)
        .context("failed to build the HTTP client")?;

    Ok(DeployEnv {
        config: Arc::new(config),
        provider,
        connector: Arc::new(SshConnector::new(ssh.clone())),
        tunnels,
        builder: Arc::new(RemoteDockerBuilder::new(ssh, build_dir)),
        probe: Arc::new(probe),
        manifests: Manifests::new()?,
        ssh_public_key,
        policy,
        cancel,
    })
}

/// A token cancelled by the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current operation");
            child.cancel();
        }
    });
    token
}
