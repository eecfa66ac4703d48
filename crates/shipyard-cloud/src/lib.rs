//! Shipyard Cloud Infrastructure
//!
//! This crate provides the provider abstraction shipyard provisions through:
//! one trait for compute vendors and one for public tunnel ingress.
//!
//! # Supported Providers
//!
//! - **Hetzner Cloud**: Networks, Firewalls, Servers, Volumes (REST API)
//! - **Scaleway**: Private Networks, Security Groups, Instances, Block volumes (REST API)
//! - **AWS**: VPCs, Security Groups, EC2 instances, EBS volumes (aws-sdk-ec2)
//! - **Cloudflare**: Tunnels and DNS (REST API)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  shipyard CLI                    │
//! │              (shipyard deploy/delete)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                shipyard-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait CloudProvider / TunnelProvider     │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ poll / retry │  │  BestEffort  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬──────────┬──────────┬──────────┬────────┘
//!         │          │          │          │
//!   ┌─────▼───┐ ┌────▼────┐ ┌───▼───┐ ┌────▼─────┐
//!   │ hetzner │ │scaleway │ │  aws  │ │cloudflare│
//!   └─────────┘ └─────────┘ └───────┘ └──────────┘
//! ```

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod teardown;
pub mod tunnel;

// Re-exports
pub use error::{CloudError, Result};
pub use poll::{PollError, PollPolicy, RetryConfig, pause, poll, retry_with_backoff};
pub use provider::{CloudProvider, ProviderKind};
pub use resource::{
    Firewall, Network, Server, ServerCreateOptions, ServerStatus, Volume, VolumeCreateOptions,
};
pub use teardown::{BestEffort, SkippedFailure};
pub use tunnel::{TunnelInfo, TunnelProvider, TunnelRequest};

/// Address plan shared by every provider
pub const NETWORK_CIDR: &str = "10.0.0.0/16";
pub const SUBNET_CIDR: &str = "10.0.1.0/24";

/// Filesystem every block volume carries, whether the provider formats it
/// or the mounter does
pub const VOLUME_FILESYSTEM: &str = "xfs";

/// Poll budget for `wait_for_device_path`
pub const DEVICE_PATH_POLL: PollPolicy = PollPolicy::secs(30, 2);
