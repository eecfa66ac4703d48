//! Hetzner Cloud provider for shipyard
//!
//! Implements [`CloudProvider`](shipyard_cloud::CloudProvider) on top of the
//! Hetzner Cloud REST API.
//!
//! # Requirements
//!
//! - `HCLOUD_TOKEN`: API token with read/write access to the project
//!
//! # Example
//!
//! ```ignore
//! use shipyard_cloud::CloudProvider;
//! use shipyard_cloud_hetzner::HetznerProvider;
//!
//! let provider = HetznerProvider::new(std::env::var("HCLOUD_TOKEN")?);
//! provider.validate_credentials().await?;
//! let network = provider.find_or_create_network("myapp-network").await?;
//! ```

pub mod client;
mod model;
pub mod provider;

pub use client::{HETZNER_API_BASE, HetznerClient};
pub use provider::HetznerProvider;
