//! Scaleway provider for shipyard
//!
//! Implements [`CloudProvider`](shipyard_cloud::CloudProvider) with the
//! Scaleway Instance, VPC and Block Storage APIs. Private networks live in a
//! region (`fr-par`), everything else in a zone (`fr-par-1`).
//!
//! # Requirements
//!
//! - `SCW_SECRET_KEY`: API secret key
//! - `SCW_DEFAULT_PROJECT_ID`: project the resources are created in

pub mod client;
mod model;
pub mod provider;

pub use client::{SCALEWAY_API_BASE, ScalewayClient};
pub use provider::{ScalewayProvider, VALID_ZONES, zone_to_region};
