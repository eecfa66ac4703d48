//! Kubernetes workloads: secrets, database, auxiliary services, apps and
//! tunnel connectors, all applied through kubectl on the master.

use crate::error::{DeploymentError, Result, StepResultExt};
use shipyard_cloud::TunnelInfo;
use shipyard_core::config::AppService;
use shipyard_core::manifest::{
    AppManifest, AuxServiceManifest, CloudflaredManifest, DatabaseManifest, HostPathMount,
    IngressManifest, Probe, Resources, SecretManifest, ServicePortManifest,
};
use shipyard_core::{DatabaseAdapter, DeployConfig, Manifests, Namer};
use shipyard_remote::{Kubectl, RemoteExecutor};
use std::collections::BTreeMap;
use tracing::{error, info, instrument};

const NAMESPACE: &str = "default";
const DATABASE_STORAGE: &str = "10Gi";
const PRE_RUN_LOG_LINES: u32 = 50;

pub struct WorkloadDeployer<'a> {
    exec: &'a dyn RemoteExecutor,
    config: &'a DeployConfig,
    manifests: &'a Manifests,
    namer: Namer,
    rollout_timeout_secs: u64,
}

impl<'a> WorkloadDeployer<'a> {
    pub fn new(
        exec: &'a dyn RemoteExecutor,
        config: &'a DeployConfig,
        manifests: &'a Manifests,
        rollout_timeout_secs: u64,
    ) -> Self {
        Self {
            exec,
            config,
            manifests,
            namer: config.namer(),
            rollout_timeout_secs,
        }
    }

    fn kubectl(&self) -> Kubectl<'a> {
        Kubectl::new(self.exec)
    }

    async fn apply_secret(&self, name: String, data: BTreeMap<String, String>, step: &str) -> Result<()> {
        let manifest = self
            .manifests
            .app_secret(&SecretManifest { name, data })
            .at(step)?;
        // the whole manifest carries secret values
        self.kubectl()
            .apply_sensitive(&manifest, &manifest)
            .await
            .at(step)?;
        Ok(())
    }

    fn host_path(&self, servers: &[String], volume: &str, mount_path: &str) -> Option<HostPathMount> {
        let group = servers.first()?;
        Some(HostPathMount {
            name: volume.to_string(),
            mount_path: mount_path.to_string(),
            host_path: self.namer.volume_host_path(group, volume),
        })
    }

    /// StatefulSet plus its secret. SQLite runs inside the app and is skipped.
    #[instrument(skip(self))]
    pub async fn deploy_database(&self, step: &str) -> Result<bool> {
        let Some(db) = &self.config.application.database else {
            return Ok(false);
        };
        if !db.adapter.needs_container() {
            info!(adapter = %db.adapter, "Embedded database, mounted with the app");
            return Ok(false);
        }

        let name = self.namer.database_name();
        let (image, port) = match (db.image(), db.adapter.default_port()) {
            (Some(image), Some(port)) => (image, port),
            _ => {
                return Err(DeploymentError::new(
                    step,
                    format!("no image or port known for adapter {}", db.adapter),
                ));
            }
        };
        let mount = db.mount.iter().next();
        let data_path = mount
            .map(|(_, path)| path.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(db.adapter.data_path())
            .to_string();
        let host_path = mount.and_then(|(volume, _)| {
            db.servers
                .first()
                .map(|group| self.namer.volume_host_path(group, volume))
        });

        info!(database = %name, image = %image, "Deploying database");
        self.apply_secret(self.namer.database_secret_name(), db.secrets.clone(), step)
            .await?;

        let manifest = self
            .manifests
            .database(&DatabaseManifest {
                name: name.clone(),
                adapter: db.adapter.to_string(),
                image,
                port,
                secret_name: self.namer.database_secret_name(),
                data_path,
                storage_size: DATABASE_STORAGE.to_string(),
                servers: db.servers.clone(),
                host_path,
            })
            .at(step)?;
        self.kubectl().apply(&manifest).await.at(step)?;

        info!(database = %name, "Waiting for database to be ready");
        self.kubectl()
            .rollout_status("statefulset", &name, NAMESPACE, self.rollout_timeout_secs)
            .await
            .at(step)?;
        info!(database = %name, "Database deployed");
        Ok(true)
    }

    /// Stock-image services such as caches and queues
    pub async fn deploy_services(&self, step: &str) -> Result<usize> {
        let services = &self.config.application.services;
        for (service, svc) in services {
            let name = self.namer.service_name(service);
            info!(service = %name, image = %svc.image, "Deploying service");

            let volume = svc
                .mount
                .iter()
                .next()
                .and_then(|(volume, path)| self.host_path(&svc.servers, volume, path));
            let manifest = self
                .manifests
                .aux_service(&AuxServiceManifest {
                    name: name.clone(),
                    service: service.clone(),
                    image: svc.image.clone(),
                    port: svc.port(),
                    command: svc.command.clone(),
                    env: svc.env.clone(),
                    servers: svc.servers.clone(),
                    volume,
                })
                .at(step)?;
            self.kubectl().apply(&manifest).await.at(step)?;
            self.kubectl()
                .rollout_status("deployment", &name, NAMESPACE, self.rollout_timeout_secs)
                .await
                .at(step)?;
            info!(service = %name, "Service deployed");
        }
        Ok(services.len())
    }

    /// Shared app secret, plus one per app that declares its own env
    pub async fn deploy_app_secrets(&self, step: &str) -> Result<()> {
        info!(secret = %self.namer.app_secret_name(), "Deploying app secret");
        self.apply_secret(self.namer.app_secret_name(), self.config.env_for_service(""), step)
            .await?;

        for (service, app) in &self.config.application.app {
            if !app.env.is_empty() {
                self.apply_secret(
                    self.namer.app_service_secret_name(service),
                    self.config.env_for_service(service),
                    step,
                )
                .await?;
            }
        }
        Ok(())
    }

    fn secret_for(&self, service: &str, app: &AppService) -> String {
        if app.env.is_empty() {
            self.namer.app_secret_name()
        } else {
            self.namer.app_service_secret_name(service)
        }
    }

    /// hostPath mounts for the app, including an embedded database volume
    fn app_volumes(&self, app: &AppService) -> Vec<HostPathMount> {
        let mut volumes: Vec<HostPathMount> = app
            .mounts
            .iter()
            .filter_map(|(volume, path)| self.host_path(&app.servers, volume, path))
            .collect();

        if let Some(db) = &self.config.application.database
            && db.adapter == DatabaseAdapter::Sqlite
            && app.servers.len() == 1
            && app.servers.first() == db.servers.first()
        {
            for (volume, path) in &db.mount {
                if volumes.iter().all(|v| &v.name != volume) {
                    volumes.extend(self.host_path(&db.servers, volume, path));
                }
            }
        }
        volumes
    }

    pub fn app_manifest(&self, service: &str, app: &AppService, image: &str) -> AppManifest {
        let (readiness, liveness) = match (&app.healthcheck, app.port.filter(|p| *p > 0)) {
            (Some(hc), Some(port)) => {
                let probe_port = hc.port.unwrap_or(port);
                (
                    Some(Probe::readiness(app.health_path(), probe_port)),
                    Some(Probe::liveness(app.health_path(), probe_port)),
                )
            }
            _ => (None, None),
        };

        AppManifest {
            name: self.namer.app_deployment_name(service),
            image: image.to_string(),
            replicas: if app.is_web() { 2 } else { 1 },
            port: app.port.filter(|p| *p > 0),
            command: app.command.clone().filter(|c| !c.is_empty()),
            secret_name: self.secret_for(service, app),
            servers: app.servers.clone(),
            resources: Resources::default(),
            readiness,
            liveness,
            volumes: self.app_volumes(app),
        }
    }

    /// Deployment, Service and Ingress for one app, then its pre-run command
    #[instrument(skip(self, app))]
    pub async fn deploy_app(&self, service: &str, app: &AppService, image: &str, step: &str) -> Result<()> {
        let spec = self.app_manifest(service, app, image);
        let name = spec.name.clone();
        info!(deployment = %name, image = %image, "Deploying app");

        let manifest = self.manifests.app_deployment(&spec).at(step)?;
        self.kubectl().apply(&manifest).await.at(step)?;

        if let Some(port) = spec.port {
            let manifest = self
                .manifests
                .app_service(&ServicePortManifest {
                    name: name.clone(),
                    port,
                })
                .at(step)?;
            self.kubectl().apply(&manifest).await.at(step)?;

            if let Some(host) = app.hostname() {
                let manifest = self
                    .manifests
                    .ingress(&IngressManifest {
                        name: name.clone(),
                        host,
                        port,
                    })
                    .at(step)?;
                self.kubectl().apply(&manifest).await.at(step)?;
            }
        }

        info!(deployment = %name, "Waiting for rollout");
        self.kubectl()
            .rollout_status("deployment", &name, NAMESPACE, self.rollout_timeout_secs)
            .await
            .at(step)?;

        if let Some(command) = app.pre_run_command.as_deref().filter(|c| !c.is_empty()) {
            self.run_pre_run_command(service, command).await?;
        }
        info!(deployment = %name, "App deployed");
        Ok(())
    }

    /// Run `command` in the app's first pod. A failure aborts the deploy
    /// after dumping the pod's recent logs.
    pub async fn run_pre_run_command(&self, service: &str, command: &str) -> Result<()> {
        const STEP: &str = "pre_run_command";
        info!(service = %service, command = %command, "Running pre-run command");

        let kubectl = self.kubectl();
        let pod = kubectl
            .first_pod(&self.namer.pod_selector(service), NAMESPACE)
            .await
            .at(STEP)?;
        if pod.is_empty() {
            return Err(DeploymentError::new(
                STEP,
                format!("no running pod found for {}", service),
            ));
        }

        match kubectl.exec_in_pod(&pod, NAMESPACE, command).await {
            Ok(output) => {
                if !output.is_empty() {
                    info!(pod = %pod, "Pre-run command output:\n{}", output);
                }
                Ok(())
            }
            Err(e) => {
                error!(pod = %pod, error = %e, "Pre-run command failed");
                if let Ok(logs) = kubectl.logs(&pod, NAMESPACE, PRE_RUN_LOG_LINES).await {
                    error!(pod = %pod, "Pod logs:\n{}", logs);
                }
                Err(DeploymentError::new(
                    STEP,
                    format!("deployment aborted: pre-run command failed: {}", e),
                ))
            }
        }
    }

    /// Tunnel connector for one app
    pub async fn deploy_cloudflared(&self, tunnel: &TunnelInfo, step: &str) -> Result<()> {
        let name = self.namer.cloudflared_name(&tunnel.service_name);
        info!(deployment = %name, hostname = %tunnel.hostname, "Deploying cloudflared");

        let manifest = self
            .manifests
            .cloudflared(&CloudflaredManifest {
                name: name.clone(),
                token: tunnel.tunnel_token.clone(),
            })
            .at(step)?;
        self.kubectl()
            .apply_sensitive(&manifest, &tunnel.tunnel_token)
            .await
            .at(step)?;
        self.kubectl()
            .rollout_status("deployment", &name, NAMESPACE, self.rollout_timeout_secs)
            .await
            .at(step)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_remote::memory::ScriptedExecutor;
    use std::path::Path;

    const CONFIG: &str = r#"
application:
  name: myapp
  env:
    RAILS_LOG_TO_STDOUT: "1"
  servers:
    master:
      master: true
      volumes:
        data: { size: 20 }
  database:
    adapter: sqlite
    servers: [master]
    mount:
      data: /app/storage
  app:
    web:
      servers: [master]
      domain: example.com
      port: 3000
      healthcheck: { path: /up }
      pre_run_command: bin/rails db:migrate
    jobs:
      servers: [master]
      command: bin/jobs
      env:
        QUEUE: default
provider:
  hetzner: { server_type: cx22, server_location: fsn1 }
"#;

    fn config() -> DeployConfig {
        DeployConfig::parse(CONFIG, Path::new("shipyard.yaml")).unwrap()
    }

    #[test]
    fn test_web_app_gets_probes_and_two_replicas() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        let web = &config.application.app["web"];
        let spec = deployer.app_manifest("web", web, "localhost:30500/myapp:1");
        assert_eq!(spec.name, "myapp-web");
        assert_eq!(spec.replicas, 2);
        assert_eq!(spec.port, Some(3000));
        assert_eq!(spec.secret_name, "app-secret-myapp");
        assert_eq!(spec.readiness.as_ref().map(|p| p.path.as_str()), Some("/up"));
        assert_eq!(spec.liveness.as_ref().map(|p| p.initial_delay), Some(30));
    }

    #[test]
    fn test_worker_uses_its_own_secret_and_no_probes() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        let jobs = &config.application.app["jobs"];
        let spec = deployer.app_manifest("jobs", jobs, "img");
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.port, None);
        assert!(spec.readiness.is_none());
        assert_eq!(spec.secret_name, "app-secret-myapp-jobs");
        assert_eq!(spec.command.as_deref(), Some("bin/jobs"));
    }

    #[test]
    fn test_sqlite_volume_is_mounted_into_apps_on_its_group() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        let spec = deployer.app_manifest("web", &config.application.app["web"], "img");
        assert_eq!(spec.volumes.len(), 1);
        assert_eq!(spec.volumes[0].mount_path, "/app/storage");
        assert_eq!(
            spec.volumes[0].host_path,
            config.namer().volume_host_path("master", "data")
        );
    }

    #[tokio::test]
    async fn test_app_secrets_are_split_per_service_env() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        deployer.deploy_app_secrets("deploy apps").await.unwrap();

        let commands = exec.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("name: app-secret-myapp\n"));
        assert!(!commands[0].contains("QUEUE"));
        assert!(commands[1].contains("name: app-secret-myapp-jobs"));
        assert!(commands[1].contains("QUEUE: \"default\""));
        assert!(commands[1].contains("RAILS_LOG_TO_STDOUT"));
    }

    #[tokio::test]
    async fn test_sqlite_has_no_statefulset() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        assert!(!deployer.deploy_database("deploy database").await.unwrap());
        assert!(exec.commands().is_empty());
    }

    #[tokio::test]
    async fn test_web_app_applies_service_ingress_then_pre_run() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        exec.on("items[0].metadata.name", "myapp-web-abc");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        deployer
            .deploy_app("web", &config.application.app["web"], "img", "deploy apps")
            .await
            .unwrap();

        assert!(exec.ran("kind: Ingress"));
        assert!(exec.ran("kind: Service"));
        let rollout = exec.position("rollout status deployment/myapp-web").unwrap();
        let migrate = exec.position("kubectl exec -n default myapp-web-abc").unwrap();
        assert!(rollout < migrate);
    }

    #[tokio::test]
    async fn test_failed_pre_run_command_dumps_logs_and_aborts() {
        let config = config();
        let manifests = Manifests::new().unwrap();
        let exec = ScriptedExecutor::new("203.0.113.2");
        exec.on("items[0].metadata.name", "myapp-web-abc");
        exec.fail_on("kubectl exec");
        let deployer = WorkloadDeployer::new(&exec, &config, &manifests, 300);

        let err = deployer
            .run_pre_run_command("web", "bin/rails db:migrate")
            .await
            .unwrap_err();
        assert_eq!(err.step, "pre_run_command");
        assert!(err.message.contains("deployment aborted"));
        assert!(exec.ran("kubectl logs myapp-web-abc -n default --tail=50"));
    }
}
