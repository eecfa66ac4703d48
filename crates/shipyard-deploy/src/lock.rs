//! Deploy lock on the master
//!
//! A file holding the unix time the lock was taken. Two deploys against the
//! same application would race on image tags and rollouts, so the second one
//! stops unless the first is old enough to be presumed dead.

use crate::error::{DeploymentError, Result, StepResultExt};
use shipyard_remote::RemoteExecutor;
use std::time::Duration;
use tracing::{info, warn};

pub struct DeployLock {
    path: String,
    stale_after: Duration,
}

impl DeployLock {
    pub fn new(path: impl Into<String>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Take the lock at unix time `now`
    pub async fn acquire(&self, exec: &dyn RemoteExecutor, now: i64, step: &str) -> Result<()> {
        let current = exec
            .execute(&format!("test -f {p} && cat {p} || echo ''", p = self.path))
            .await
            .at(step)?;

        if let Ok(taken_at) = current.trim().parse::<i64>() {
            let age = now.saturating_sub(taken_at).max(0) as u64;
            if age < self.stale_after.as_secs() {
                return Err(DeploymentError::new(
                    step,
                    format!(
                        "another deployment is in progress (lock taken {}s ago); remove {} if it is stale",
                        age, self.path
                    ),
                ));
            }
            warn!(path = %self.path, age_secs = age, "Replacing stale deploy lock");
        }

        exec.execute(&format!("echo {} > {}", now, self.path))
            .await
            .at(step)?;
        info!(path = %self.path, "Deploy lock acquired");
        Ok(())
    }

    pub async fn release(&self, exec: &dyn RemoteExecutor) {
        match exec.execute_ignore_errors(&format!("rm -f {}", self.path)).await {
            Some(_) => info!(path = %self.path, "Deploy lock released"),
            None => warn!(path = %self.path, "Could not release deploy lock"),
        }
    }
}
