//! shipyard-deploy
//!
//! The deploy pipeline: provisioning through the cloud provider, cluster
//! bootstrap, image build, workloads, public tunnels and traffic
//! verification, plus the matching teardown.
//!
//! ```ignore
//! let env = DeployEnv { config, provider, connector, tunnels, builder, probe, .. };
//! let mut ctx = RunContext::new();
//! steps::deploy_pipeline().run(&env, &mut ctx, &Silent).await?;
//! ```

pub mod context;
pub mod env;
pub mod error;
pub mod image;
pub mod lock;
pub mod pipeline;
pub mod reconcile;
pub mod retention;
pub mod steps;
pub mod teardown;
pub mod tunnels;
pub mod verify;
pub mod volume;
pub mod workloads;

pub use context::{ProvisionedServer, RunContext};
pub use env::{DeployEnv, DeployPolicy};
pub use error::{DeploymentError, Result};
pub use image::{ImageBuilder, ImageError, ImageRequest, RemoteDockerBuilder};
pub use pipeline::{Pipeline, Silent, Step, StepObserver};
pub use steps::deploy_pipeline;
pub use teardown::Teardown;
pub use verify::{HttpProbe, ProbeOutcome, ReqwestProbe, TrafficVerifier, VerifyPolicy};
