//! Block volumes: provision, attach and mount
//!
//! Volumes are declared per server group and live on the group's first
//! server. Mounting is persisted through a UUID keyed fstab entry.

use crate::env::DeployEnv;
use shipyard_cloud::{
    CloudError, PollError, Result, Server, VOLUME_FILESYSTEM, Volume, VolumeCreateOptions, poll,
};
use shipyard_core::DeployConfig;
use shipyard_remote::RemoteExecutor;
use tracing::{info, instrument};

/// A volume declared in the configuration, resolved to concrete names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePlan {
    pub name: String,
    pub group: String,
    pub server_name: String,
    pub mount_path: String,
    pub size_gb: u32,
}

pub fn plan_volumes(config: &DeployConfig) -> Vec<VolumePlan> {
    let namer = config.namer();
    let mut plans = Vec::new();
    for (group, spec) in &config.application.servers {
        for (volume, vol) in &spec.volumes {
            plans.push(VolumePlan {
                name: namer.volume_name(group, volume),
                group: group.clone(),
                server_name: namer.server_name(group, 1),
                mount_path: namer.volume_host_path(group, volume),
                size_gb: vol.size,
            });
        }
    }
    plans
}

pub struct VolumeMounter<'a> {
    env: &'a DeployEnv,
}

impl<'a> VolumeMounter<'a> {
    pub fn new(env: &'a DeployEnv) -> Self {
        Self { env }
    }

    /// Find or create the volume, attach it to `server` and mount it there
    #[instrument(skip(self, plan, server), fields(volume = %plan.name))]
    pub async fn provision(&self, plan: &VolumePlan, server: &Server) -> Result<Volume> {
        let provider = &self.env.provider;

        let volume = match provider.get_volume_by_name(&plan.name).await? {
            Some(existing) => {
                info!("Volume already exists");
                existing
            }
            None => {
                provider
                    .create_volume(&VolumeCreateOptions {
                        name: plan.name.clone(),
                        size_gb: plan.size_gb,
                        server_id: server.id.clone(),
                    })
                    .await?
            }
        };

        if volume.is_attached_to(&server.id) {
            info!("Volume already attached");
        } else if volume.is_attached() {
            return Err(CloudError::Volume(format!(
                "{} is attached to another server ({})",
                plan.name,
                volume.server_id.as_deref().unwrap_or_default()
            )));
        } else {
            info!(server = %server.name, "Attaching volume");
            provider.attach_volume(&volume.id, &server.id).await?;
        }

        let ip = server
            .public_ipv4
            .as_deref()
            .ok_or_else(|| CloudError::Volume(format!("{} has no public address", server.name)))?;
        let exec = self.env.connector.connect(ip);
        self.mount(exec.as_ref(), &volume, &plan.mount_path).await?;

        Ok(provider.get_volume(&volume.id).await?.unwrap_or(volume))
    }

    async fn mount(&self, exec: &dyn RemoteExecutor, volume: &Volume, mount_path: &str) -> Result<()> {
        let device = self
            .env
            .provider
            .wait_for_device_path(&volume.id, exec, &self.env.cancel)
            .await?
            .ok_or_else(|| {
                CloudError::Volume(format!("volume {} has no device path after attachment", volume.id))
            })?;
        info!(device = %device, "Waiting for block device");
        self.wait_for_device(exec, &device).await?;

        let mounted = exec.execute(&mountpoint_check(mount_path)).await?;
        if mounted.trim() == "mounted" {
            info!(path = %mount_path, "Volume already mounted");
            return Ok(());
        }

        exec.execute(&format!("sudo mkdir -p {}", mount_path)).await?;

        let blkid = exec.execute(&format!("sudo blkid {} || true", device)).await?;
        if !blkid.contains("TYPE=") {
            info!(device = %device, "Formatting volume with {}", VOLUME_FILESYSTEM);
            exec.execute(&format!("sudo mkfs.{} -q {}", VOLUME_FILESYSTEM, device)).await?;
        }

        exec.execute(&format!("sudo mount {} {}", device, mount_path)).await?;

        let fstab = exec
            .execute(&format!("grep '{}' /etc/fstab || true", mount_path))
            .await?;
        if fstab.trim().is_empty() {
            exec.execute(&fstab_entry(&device, mount_path)).await?;
        }

        let verified = exec.execute(&mountpoint_check(mount_path)).await?;
        if verified.trim() != "mounted" {
            return Err(CloudError::Volume(format!("volume not mounted at {}", mount_path)));
        }
        info!(path = %mount_path, "Volume mounted");
        Ok(())
    }

    async fn wait_for_device(&self, exec: &dyn RemoteExecutor, device: &str) -> Result<()> {
        let check = format!("test -b {} && echo ready || true", device);
        poll(self.env.policy.block_device, device, &self.env.cancel, || {
            let check = check.clone();
            async move {
                let ready = matches!(exec.execute(&check).await, Ok(out) if out.trim() == "ready");
                Ok::<_, CloudError>(ready.then_some(()))
            }
        })
        .await
        .map_err(|e: PollError<CloudError>| match e {
            PollError::Exhausted { what, .. } => {
                CloudError::Volume(format!("device not available: {}", what))
            }
            other => CloudError::from(other),
        })
    }
}

fn mountpoint_check(path: &str) -> String {
    format!("mountpoint -q {} && echo mounted || echo not", path)
}

fn fstab_entry(device: &str, mount_path: &str) -> String {
    format!(
        "UUID=$(sudo blkid -s UUID -o value {dev}) && \
         echo \"UUID=$UUID {path} {fs} defaults,nofail 0 2\" | sudo tee -a /etc/fstab > /dev/null",
        dev = device,
        path = mount_path,
        fs = VOLUME_FILESYSTEM
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_volumes_land_on_first_server_of_group() {
        let config = DeployConfig::parse(
            "application:\n  name: myapp\n  servers:\n    master: { master: true, volumes: { data: { size: 20 } } }\n    workers: { count: 2 }\nprovider:\n  hetzner: { server_type: cx22, server_location: fsn1 }\n",
            Path::new("shipyard.yaml"),
        )
        .unwrap();

        let plans = plan_volumes(&config);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].name, "myapp-master-data");
        assert_eq!(plans[0].server_name, "myapp-master-1");
        assert_eq!(plans[0].mount_path, "/opt/shipyard/volumes/myapp-master-data");
        assert_eq!(plans[0].size_gb, 20);
    }

    #[test]
    fn test_fstab_type_matches_formatted_filesystem() {
        let entry = fstab_entry("/dev/sdb", "/mnt/data");
        assert!(entry.contains(&format!("/mnt/data {} defaults", VOLUME_FILESYSTEM)));
        assert!(!entry.contains("ext4"));
    }

    #[test]
    fn test_fstab_entry_is_uuid_keyed() {
        let entry = fstab_entry("/dev/sdb", "/opt/shipyard/volumes/myapp-master-data");
        assert!(entry.contains("blkid -s UUID -o value /dev/sdb"));
        assert!(entry.contains("UUID=$UUID /opt/shipyard/volumes/myapp-master-data xfs defaults,nofail 0 2"));
    }
}
