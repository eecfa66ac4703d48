//! Pipeline error type
//!
//! Every failure that leaves the pipeline names the step it happened in.
//! Lower layers keep their own error enums; [`StepResultExt::at`] converts
//! them at the step boundary.

use shipyard_cloud::{CloudError, PollError};
use shipyard_cluster::ClusterError;
use shipyard_core::{ConfigError, ManifestError};
use shipyard_remote::RemoteError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{step}: {message}")]
pub struct DeploymentError {
    pub step: String,
    pub message: String,
    cancelled: bool,
}

impl DeploymentError {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            cancelled: false,
        }
    }

    pub fn cancelled(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: "cancelled".to_string(),
            cancelled: true,
        }
    }

    /// Attribute a lower-layer failure to `step`
    pub fn at<E: StepCause>(step: impl Into<String>, err: E) -> Self {
        Self {
            step: step.into(),
            message: err.to_string(),
            cancelled: err.is_cancellation(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Errors that can end a step
pub trait StepCause: fmt::Display {
    fn is_cancellation(&self) -> bool {
        false
    }
}

impl StepCause for CloudError {
    fn is_cancellation(&self) -> bool {
        matches!(self, CloudError::Cancelled(_))
    }
}

impl StepCause for ClusterError {
    fn is_cancellation(&self) -> bool {
        self.is_cancelled()
    }
}

impl<E: fmt::Display> StepCause for PollError<E> {
    fn is_cancellation(&self) -> bool {
        matches!(self, PollError::Cancelled { .. })
    }
}

impl StepCause for RemoteError {}
impl StepCause for ConfigError {}
impl StepCause for ManifestError {}

/// A value an earlier step was supposed to put into the run context
#[derive(Debug, Clone, Error)]
#[error("{0} is not available; the step that provides it did not run")]
pub struct MissingContext(pub &'static str);

impl StepCause for MissingContext {}

pub trait StepResultExt<T> {
    fn at(self, step: &str) -> Result<T>;
}

impl<T, E: StepCause> StepResultExt<T> for std::result::Result<T, E> {
    fn at(self, step: &str) -> Result<T> {
        self.map_err(|e| DeploymentError::at(step, e))
    }
}

pub type Result<T> = std::result::Result<T, DeploymentError>;
