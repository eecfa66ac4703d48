//! Best-effort results for teardown paths
//!
//! Creation is strict: any failure propagates. Teardown is not: a detach that
//! fails should not stop the delete that follows it. [`BestEffort`] records
//! those swallowed failures so callers can still report them.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFailure {
    pub operation: String,
    pub message: String,
}

impl fmt::Display for SkippedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[must_use]
pub struct BestEffort {
    failures: Vec<SkippedFailure>,
}

impl BestEffort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the success value, or log and record the failure
    pub fn record<T, E: fmt::Display>(
        &mut self,
        operation: impl Into<String>,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let operation = operation.into();
                tracing::warn!(operation = %operation, error = %e, "Ignoring teardown failure");
                self.failures.push(SkippedFailure {
                    operation,
                    message: e.to_string(),
                });
                None
            }
        }
    }

    pub fn merge(&mut self, other: BestEffort) {
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[SkippedFailure] {
        &self.failures
    }
}
