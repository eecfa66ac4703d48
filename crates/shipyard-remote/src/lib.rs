//! shipyard remote execution
//!
//! Runs shell commands on provisioned hosts. The [`RemoteExecutor`] trait is
//! the seam the cluster bootstrapper and the deploy pipeline talk to; the
//! production implementation shells out to the system `ssh` client.
//!
//! ```ignore
//! use shipyard_remote::{RemoteExecutor, SshConfig, SshExecutor};
//!
//! let ssh = SshExecutor::new("203.0.113.10", SshConfig::new("deploy", "~/.ssh/id_ed25519"));
//! let hostname = ssh.execute("hostname").await?;
//! ```

pub mod containerd;
pub mod error;
pub mod executor;
pub mod kubectl;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod shell;
pub mod ssh;

pub use containerd::Containerd;
pub use error::{RemoteError, Result};
pub use executor::{RemoteCommand, RemoteConnector, RemoteExecutor};
pub use kubectl::Kubectl;
pub use ssh::{SshConfig, SshConnector, SshExecutor};
