//! Read-only collaborators shared by every step

use crate::image::ImageBuilder;
use crate::verify::{HttpProbe, VerifyPolicy};
use shipyard_cloud::{CloudProvider, PollPolicy, TunnelProvider};
use shipyard_cluster::BootstrapPolicy;
use shipyard_core::{DeployConfig, Manifests, Namer};
use shipyard_remote::RemoteConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// OS image servers are created from
pub const DEFAULT_IMAGE: &str = "ubuntu-24.04";

/// Attempt budgets for every wait the pipeline performs itself
#[derive(Debug, Clone, Copy)]
pub struct DeployPolicy {
    pub server_ready_attempts: u32,
    pub ssh_ready: PollPolicy,
    pub block_device: PollPolicy,
    pub bootstrap: BootstrapPolicy,
    pub traffic: VerifyPolicy,
    pub firewall_delete: PollPolicy,
    /// A lock older than this belongs to a run that died
    pub lock_stale_after: Duration,
    pub rollout_timeout_secs: u64,
}

impl Default for DeployPolicy {
    fn default() -> Self {
        Self {
            server_ready_attempts: 60,
            ssh_ready: PollPolicy::secs(60, 5),
            block_device: PollPolicy::secs(30, 2),
            bootstrap: BootstrapPolicy::default(),
            traffic: VerifyPolicy::default(),
            firewall_delete: PollPolicy::secs(5, 3),
            lock_stale_after: Duration::from_secs(3600),
            rollout_timeout_secs: 300,
        }
    }
}

pub struct DeployEnv {
    pub config: Arc<DeployConfig>,
    pub provider: Arc<dyn CloudProvider>,
    pub connector: Arc<dyn RemoteConnector>,
    /// Absent when no app has a public domain
    pub tunnels: Option<Arc<dyn TunnelProvider>>,
    pub builder: Arc<dyn ImageBuilder>,
    pub probe: Arc<dyn HttpProbe>,
    pub manifests: Manifests,
    /// Authorized for the SSH user through cloud-init
    pub ssh_public_key: String,
    pub policy: DeployPolicy,
    pub cancel: CancellationToken,
}

impl DeployEnv {
    pub fn namer(&self) -> Namer {
        self.config.namer()
    }
}
