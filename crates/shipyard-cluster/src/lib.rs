//! shipyard-cluster
//!
//! Bootstraps a K3s cluster on provisioned servers over SSH: container
//! runtime, control plane, worker join, in-cluster registry and ingress.

pub mod bootstrap;
pub mod error;
pub mod k3s;

pub use bootstrap::{BootstrapPolicy, Bootstrapper, ClusterToken, MasterNode, PrivateNetwork};
pub use error::{ClusterError, Result};
