//! The deploy pipeline's steps, in the order they run

mod cluster;
mod provision;
mod release;

pub use cluster::{BootstrapCluster, ConfigureTunnels};
pub use provision::{ProvisionNetwork, ProvisionServers, ProvisionVolumes, ValidateProvider};
pub use release::{
    AcquireLock, BuildImage, CleanupImages, DeployApps, DeployDatabase, DeployServices,
    ReleaseLock, VerifyTraffic,
};

use crate::context::RunContext;
use crate::env::DeployEnv;
use crate::error::{Result, StepResultExt};
use crate::pipeline::Pipeline;
use shipyard_remote::RemoteExecutor;
use std::sync::Arc;

/// Infrastructure through verified traffic. Tunnels are configured before the
/// apps so each connector deployment has its token.
pub fn deploy_pipeline() -> Pipeline {
    Pipeline::new()
        .step(ValidateProvider)
        .step(ProvisionNetwork)
        .step(ProvisionServers)
        .step(ProvisionVolumes)
        .step(BootstrapCluster)
        .step(ConfigureTunnels)
        .step(AcquireLock)
        .step(BuildImage)
        .step(DeployDatabase)
        .step(DeployServices)
        .step(DeployApps)
        .step(VerifyTraffic)
        .step(CleanupImages)
        .finally(ReleaseLock)
}

/// Executor for the elected master
fn master_exec(env: &DeployEnv, ctx: &RunContext, step: &str) -> Result<Arc<dyn RemoteExecutor>> {
    let ip = ctx.main_server_ip().at(step)?;
    Ok(env.connector.connect(ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert_eq!(
            deploy_pipeline().step_names(),
            vec![
                "validate provider",
                "provision network",
                "provision servers",
                "provision volumes",
                "bootstrap cluster",
                "configure tunnels",
                "lock",
                "build image",
                "deploy database",
                "deploy services",
                "deploy apps",
                "verify traffic",
                "cleanup images",
            ]
        );
    }
}
