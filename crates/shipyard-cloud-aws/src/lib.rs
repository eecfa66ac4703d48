//! AWS EC2 provider for shipyard
//!
//! Networks are VPCs with a single public subnet, firewalls are security
//! groups and volumes are gp3 EBS volumes in the instance's availability zone.
//!
//! # Requirements
//!
//! - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
//! - `AWS_REGION` (defaults to `us-east-1`)

mod convert;
pub mod provider;

pub use provider::{AwsProvider, DEFAULT_REGION};
