//! Cloudflare provider for shipyard
//!
//! Public ingress without opening ports: each app service with a domain gets
//! a remotely managed Cloudflare Tunnel pointed at the in-cluster ingress
//! controller, plus a proxied CNAME to `{tunnel_id}.cfargotunnel.com`.
//!
//! # Requirements
//!
//! - `CLOUDFLARE_API_TOKEN`: token with Tunnel edit and DNS edit permissions
//! - `CLOUDFLARE_ACCOUNT_ID`
//!
//! # Example
//!
//! ```ignore
//! use shipyard_cloud::{TunnelProvider, TunnelRequest};
//! use shipyard_cloud_cloudflare::CloudflareTunnels;
//!
//! let tunnels = CloudflareTunnels::new(token, account_id);
//! let info = tunnels.ensure_tunnel(&request, &cancel).await?;
//! ```

pub mod client;
mod dns;
pub mod model;
pub mod provider;
mod tunnel;

pub use client::{CLOUDFLARE_API_BASE, CloudflareClient};
pub use provider::{CONFIG_VERIFY_POLL, CloudflareTunnels};
