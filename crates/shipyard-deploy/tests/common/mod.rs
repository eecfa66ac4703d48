#![allow(dead_code)]

use async_trait::async_trait;
use shipyard_cloud::memory::{InMemoryProvider, InMemoryTunnels};
use shipyard_core::{DeployConfig, Manifests};
use shipyard_deploy::image::{ImageBuilder, ImageError, ImageRequest};
use shipyard_deploy::verify::{HttpProbe, ProbeOutcome};
use shipyard_deploy::{DeployEnv, DeployPolicy};
use shipyard_remote::RemoteExecutor;
use shipyard_remote::memory::{ScriptedConnector, ScriptedExecutor};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const MASTER_IP: &str = "203.0.113.2";
pub const WORKER_IP: &str = "203.0.113.3";
pub const JOIN_TOKEN: &str = "K10abcdef0123456789::server:fedcba9876543210";

pub const CONFIG: &str = r#"
application:
  name: myapp
  servers:
    master:
      master: true
      volumes:
        data: { size: 20 }
    workers:
      count: 1
  app:
    web:
      servers: [master]
      domain: example.com
      port: 3000
      healthcheck: { path: /up }
      pre_run_command: bin/rails db:migrate
    jobs:
      servers: [workers]
      command: bin/jobs
  database:
    servers: [master]
    adapter: postgres
    mount:
      data: /var/lib/postgresql/data
    secrets:
      POSTGRES_USER: myapp
      POSTGRES_PASSWORD: hunter2
      POSTGRES_DB: myapp_production
  services:
    redis: { servers: [master], image: "redis:7-alpine", port: 6379 }
  secrets:
    SECRET_KEY_BASE: s3cr3t
provider:
  hetzner: { server_type: cx22, server_location: fsn1 }
"#;

/// Records build requests instead of running docker
#[derive(Default)]
pub struct FakeBuilder {
    pub requests: Mutex<Vec<ImageRequest>>,
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build_and_push(
        &self,
        _master: &dyn RemoteExecutor,
        request: &ImageRequest,
    ) -> Result<String, ImageError> {
        self.requests
            .lock()
            .unwrap()
            .push(request.clone());
        Ok(request.reference())
    }
}

/// Answers every probe with the same outcome
pub struct FixedProbe(pub ProbeOutcome);

impl FixedProbe {
    pub fn healthy() -> Self {
        Self(ProbeOutcome::Response {
            status: 200,
            error_marker: false,
        })
    }
}

#[async_trait]
impl HttpProbe for FixedProbe {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        self.0.clone()
    }
}

pub struct Harness {
    pub provider: Arc<InMemoryProvider>,
    pub connector: Arc<ScriptedConnector>,
    pub tunnels: Arc<InMemoryTunnels>,
    pub builder: Arc<FakeBuilder>,
    pub env: DeployEnv,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CONFIG)
    }

    pub fn with_config(yaml: &str) -> Self {
        let config = DeployConfig::parse(yaml, Path::new("shipyard.yaml")).unwrap();
        let provider = Arc::new(InMemoryProvider::new());
        let connector = Arc::new(ScriptedConnector::new());
        let tunnels = Arc::new(InMemoryTunnels::new());
        let builder = Arc::new(FakeBuilder::default());

        script_master(&connector.executor(MASTER_IP));
        script_worker(&connector.executor(WORKER_IP));

        let env = DeployEnv {
            config: Arc::new(config),
            provider: provider.clone(),
            connector: connector.clone(),
            tunnels: Some(tunnels.clone()),
            builder: builder.clone(),
            probe: Arc::new(FixedProbe::healthy()),
            manifests: Manifests::new().unwrap(),
            ssh_public_key: "ssh-ed25519 AAAAC3Nza test@shipyard".to_string(),
            policy: DeployPolicy::default(),
            cancel: CancellationToken::new(),
        };

        Self {
            provider,
            connector,
            tunnels,
            builder,
            env,
        }
    }

    pub fn master(&self) -> Arc<ScriptedExecutor> {
        self.connector.executor(MASTER_IP)
    }

    pub fn worker(&self) -> Arc<ScriptedExecutor> {
        self.connector.executor(WORKER_IP)
    }
}

fn script_host(exec: &ScriptedExecutor, private_ip: &str) {
    // SSH readiness, cloud-init and block device checks all echo "ready"
    exec.on("echo ready", "ready");
    exec.fail_on("systemctl is-active");
    exec.on("print $2", private_ip);
    exec.on("print $NF", "enp7s0");
}

pub fn script_master(exec: &ScriptedExecutor) {
    script_host(exec, "10.0.1.2");
    exec.on(
        "kubectl get nodes --no-headers",
        "myapp-master-1   Ready   control-plane,master   1m   v1.29.3+k3s1",
    );
    exec.on("kubectl get nodes -o name", "node/myapp-master-1\nnode/myapp-workers-1");
    exec.on("items[0].metadata.name", "myapp-master-1");
    exec.on("{.status.readyReplicas}", "1");
    exec.on("{.spec.replicas}", "1");
    exec.on("node-token", JOIN_TOKEN);
    exec.on_sequence(
        "mountpoint -q",
        vec![
            shipyard_remote::memory::Reply::ok("not"),
            shipyard_remote::memory::Reply::ok("mounted"),
        ],
    );
}

pub fn script_worker(exec: &ScriptedExecutor) {
    script_host(exec, "10.0.1.3");
}
