//! K3s cluster bootstrap
//!
//! The master is installed first and yields the join token; workers join
//! with it afterwards. Every phase checks whether it already ran, so a rerun
//! against a live cluster only re-reads the token.

use crate::error::{ClusterError, Result};
use crate::k3s;
use shipyard_cloud::{PollPolicy, poll};
use shipyard_core::manifest::{ErrorBackendManifest, Manifests, RegistryManifest};
use shipyard_core::naming::{ERROR_BACKEND_NAME, NODE_LABEL, REGISTRY_NAME, redact};
use shipyard_remote::{Kubectl, RemoteCommand, RemoteExecutor};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const INGRESS_NAMESPACE: &str = "ingress-nginx";
const INGRESS_CONTROLLER: &str = "ingress-nginx-controller";
const CUSTOM_HTTP_ERRORS: &str = "502,503,504";
const ROLLOUT_TIMEOUT_SECS: u64 = 120;

/// Poll budgets for each readiness wait
#[derive(Debug, Clone, Copy)]
pub struct BootstrapPolicy {
    pub cloud_init: PollPolicy,
    pub node_ready: PollPolicy,
    pub registry: PollPolicy,
    pub ingress: PollPolicy,
    pub error_backend: PollPolicy,
    pub worker_join: PollPolicy,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            cloud_init: PollPolicy::secs(60, 5),
            node_ready: PollPolicy::secs(60, 5),
            registry: PollPolicy::secs(24, 5),
            ingress: PollPolicy::secs(60, 10),
            error_backend: PollPolicy::secs(30, 2),
            worker_join: PollPolicy::secs(30, 5),
        }
    }
}

/// Join secret read from the master; never printed in full
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterToken(String);

impl ClusterToken {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(ClusterError::EmptyToken);
        }
        Ok(Self(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClusterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterToken({})", redact(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateNetwork {
    pub ip: String,
    pub interface: String,
}

/// What workers need from the master
#[derive(Debug, Clone)]
pub struct MasterNode {
    pub name: String,
    pub private_ip: String,
    pub token: ClusterToken,
}

pub struct Bootstrapper<'a> {
    manifests: &'a Manifests,
    ssh_user: String,
    policy: BootstrapPolicy,
    cancel: CancellationToken,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(manifests: &'a Manifests, ssh_user: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            manifests,
            ssh_user: ssh_user.into(),
            policy: BootstrapPolicy::default(),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: BootstrapPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Block until cloud-init has finished on the host
    pub async fn wait_for_cloud_init(&self, exec: &dyn RemoteExecutor) -> Result<()> {
        info!(host = %exec.host(), "Waiting for cloud-init to complete");
        let result = poll(self.policy.cloud_init, "cloud-init", &self.cancel, || async move {
            Ok::<_, ClusterError>(match exec.execute(k3s::CLOUD_INIT_DONE).await {
                Ok(out) if out.contains("ready") => Some(()),
                _ => None,
            })
        })
        .await;

        match result.map_err(ClusterError::from) {
            Err(ClusterError::NotReady { attempts, .. }) => Err(ClusterError::CloudInitTimeout {
                host: exec.host().to_string(),
                attempts,
            }),
            other => other,
        }
    }

    async fn is_active(&self, exec: &dyn RemoteExecutor, check: &str) -> bool {
        matches!(exec.execute(check).await, Ok(out) if out.trim() == "active")
    }

    pub async fn private_network(&self, exec: &dyn RemoteExecutor) -> Result<PrivateNetwork> {
        let ip = exec.execute(k3s::PRIVATE_IP).await?.trim().to_string();
        if ip.is_empty() {
            return Err(ClusterError::MissingPrivateIp {
                host: exec.host().to_string(),
            });
        }
        let interface = exec.execute(k3s::PRIVATE_INTERFACE).await?.trim().to_string();
        if interface.is_empty() {
            return Err(ClusterError::MissingPrivateIp {
                host: exec.host().to_string(),
            });
        }
        Ok(PrivateNetwork { ip, interface })
    }

    /// Read the join token; an empty file is fatal
    pub async fn cluster_token(&self, exec: &dyn RemoteExecutor) -> Result<ClusterToken> {
        let output = exec.execute(&k3s::read_token()).await?;
        let token = ClusterToken::new(output)?;
        debug!(token = ?token, "Cluster token retrieved");
        Ok(token)
    }

    /// Install and configure the control plane on `server_name`
    #[instrument(skip(self, exec), fields(host = %exec.host()))]
    pub async fn bootstrap_master(
        &self,
        exec: &dyn RemoteExecutor,
        server_name: &str,
        group: &str,
    ) -> Result<MasterNode> {
        self.wait_for_cloud_init(exec).await?;

        if self.is_active(exec, k3s::SERVER_ACTIVE).await {
            info!("K3s already running, skipping installation");
            let network = self.private_network(exec).await?;
            exec.execute(&k3s::kubeconfig(&self.ssh_user, &network.ip)).await?;
            return Ok(MasterNode {
                name: server_name.to_string(),
                private_ip: network.ip,
                token: self.cluster_token(exec).await?,
            });
        }

        let network = self.private_network(exec).await?;
        info!(
            private_ip = %network.ip,
            interface = %network.interface,
            "Installing K3s server"
        );

        self.install_docker(exec, &network.ip).await?;
        exec.execute(&k3s::registries_yaml()).await?;
        exec.run(RemoteCommand::new(k3s::install_server(&network.ip, &network.interface)).streaming())
            .await?;
        info!("K3s server installed");

        exec.execute(&k3s::kubeconfig(&self.ssh_user, &network.ip)).await?;
        self.wait_for_node_ready(exec).await?;

        let kubectl = Kubectl::new(exec);
        let node = kubectl.first_node_name().await?;
        kubectl.label_node(&node, NODE_LABEL, group).await?;

        self.setup_registry(exec, group).await?;
        self.setup_ingress(exec).await?;

        Ok(MasterNode {
            name: server_name.to_string(),
            private_ip: network.ip,
            token: self.cluster_token(exec).await?,
        })
    }

    async fn install_docker(&self, exec: &dyn RemoteExecutor, private_ip: &str) -> Result<()> {
        if self.is_active(exec, k3s::DOCKER_ACTIVE).await {
            info!("Docker already running, skipping installation");
        } else {
            info!("Installing Docker for image builds");
            exec.run(RemoteCommand::new(k3s::install_docker(&self.ssh_user)).streaming())
                .await?;
        }
        exec.execute(&k3s::docker_insecure_registry(private_ip)).await?;
        Ok(())
    }

    async fn wait_for_node_ready(&self, exec: &dyn RemoteExecutor) -> Result<()> {
        info!("Waiting for K3s node to be ready");
        poll(self.policy.node_ready, "k3s node", &self.cancel, || async move {
            Ok::<_, ClusterError>(match exec.execute(k3s::NODES).await {
                Ok(out) if k3s::any_node_ready(&out) => Some(()),
                _ => None,
            })
        })
        .await?;
        info!("K3s is ready");
        Ok(())
    }

    /// Wait until `deployment` reports `expected` ready replicas
    async fn wait_for_replicas(
        &self,
        exec: &dyn RemoteExecutor,
        deployment: &str,
        namespace: &str,
        policy: PollPolicy,
    ) -> Result<()> {
        poll(policy, deployment, &self.cancel, || async move {
            let kubectl = Kubectl::new(exec);
            let ready = kubectl
                .get_jsonpath("deployment", deployment, namespace, "{.status.readyReplicas}")
                .await
                .unwrap_or_default();
            let desired = kubectl
                .get_jsonpath("deployment", deployment, namespace, "{.spec.replicas}")
                .await
                .unwrap_or_default();
            Ok::<_, ClusterError>((!ready.is_empty() && ready == desired).then_some(()))
        })
        .await?;
        Ok(())
    }

    async fn setup_registry(&self, exec: &dyn RemoteExecutor, group: &str) -> Result<()> {
        info!("Setting up in-cluster registry");
        let manifest = self.manifests.registry(&RegistryManifest::on(group))?;
        Kubectl::new(exec).apply(&manifest).await?;
        self.wait_for_replicas(exec, REGISTRY_NAME, "default", self.policy.registry)
            .await?;
        info!("In-cluster registry running");
        Ok(())
    }

    async fn setup_ingress(&self, exec: &dyn RemoteExecutor) -> Result<()> {
        info!("Setting up ingress-nginx");
        let kubectl = Kubectl::new(exec);
        kubectl.apply_url(k3s::INGRESS_NGINX_MANIFEST).await?;
        self.wait_for_replicas(exec, INGRESS_CONTROLLER, INGRESS_NAMESPACE, self.policy.ingress)
            .await?;
        info!("Ingress controller is ready");

        let manifest = self
            .manifests
            .error_backend(&ErrorBackendManifest::default())?;
        kubectl.apply(&manifest).await?;
        self.wait_for_replicas(exec, ERROR_BACKEND_NAME, INGRESS_NAMESPACE, self.policy.error_backend)
            .await?;

        exec.execute(&format!(
            "kubectl patch configmap {} -n {} --type merge -p '{{\"data\":{{\"custom-http-errors\":\"{}\"}}}}'",
            INGRESS_CONTROLLER, INGRESS_NAMESPACE, CUSTOM_HTTP_ERRORS
        ))
        .await?;

        let args = kubectl
            .get_jsonpath(
                "deployment",
                INGRESS_CONTROLLER,
                INGRESS_NAMESPACE,
                "{.spec.template.spec.containers[0].args}",
            )
            .await?;
        if args.contains("--default-backend-service") {
            info!("Error backend already wired into the ingress controller");
            return Ok(());
        }

        exec.execute(&format!(
            "kubectl patch deployment {} -n {} --type=json -p='[{{\"op\":\"add\",\"path\":\"/spec/template/spec/containers/0/args/-\",\"value\":\"--default-backend-service={}/{}\"}}]'",
            INGRESS_CONTROLLER, INGRESS_NAMESPACE, INGRESS_NAMESPACE, ERROR_BACKEND_NAME
        ))
        .await?;
        kubectl
            .rollout_status("deployment", INGRESS_CONTROLLER, INGRESS_NAMESPACE, ROLLOUT_TIMEOUT_SECS)
            .await?;
        info!("Error backend configured");
        Ok(())
    }

    /// Install the K3s agent on a worker. Joining is confirmed separately
    /// from the master with [`Bootstrapper::await_worker_join`].
    #[instrument(skip(self, exec, master), fields(host = %exec.host()))]
    pub async fn bootstrap_worker(
        &self,
        exec: &dyn RemoteExecutor,
        worker_name: &str,
        master: &MasterNode,
    ) -> Result<()> {
        self.wait_for_cloud_init(exec).await?;

        if self.is_active(exec, k3s::AGENT_ACTIVE).await {
            info!(worker = %worker_name, "K3s agent already running");
            return Ok(());
        }

        let network = self.private_network(exec).await?;
        info!(worker = %worker_name, private_ip = %network.ip, "Installing K3s agent");

        let script = k3s::install_agent(
            &master.private_ip,
            master.token.expose(),
            &network.ip,
            &network.interface,
            worker_name,
        );
        exec.run(
            RemoteCommand::new(script)
                .streaming()
                .redacting(master.token.expose()),
        )
        .await?;
        info!(worker = %worker_name, "K3s agent installed");
        Ok(())
    }

    /// Wait for `worker_name` to register, then label it with its group.
    ///
    /// Returns `false` when the node never shows up; the caller decides
    /// whether that is fatal.
    pub async fn await_worker_join(
        &self,
        master: &dyn RemoteExecutor,
        worker_name: &str,
        group: &str,
    ) -> Result<bool> {
        let joined = poll(self.policy.worker_join, worker_name, &self.cancel, || async move {
            let nodes = Kubectl::new(master).node_names().await.unwrap_or_default();
            Ok::<_, ClusterError>(nodes.iter().any(|n| n == worker_name).then_some(()))
        })
        .await
        .map_err(ClusterError::from);

        match joined {
            Ok(()) => {
                Kubectl::new(master)
                    .label_node(worker_name, NODE_LABEL, group)
                    .await?;
                info!(worker = %worker_name, "Worker labeled");
                Ok(true)
            }
            Err(ClusterError::NotReady { .. }) => {
                warn!(worker = %worker_name, "Worker node did not join the cluster in time");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(ClusterToken::new("  \n"), Err(ClusterError::EmptyToken)));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = ClusterToken::new("K10f00dfeed::server:0123456789abcdef").unwrap();
        let shown = format!("{:?}", token);
        assert!(!shown.contains("0123456789abcdef"));
        assert!(shown.starts_with("ClusterToken(K10f"));
    }
}
