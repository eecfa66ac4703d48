//! Ordered step execution
//!
//! Steps run strictly one after another. The first failure stops the run and
//! is returned as is; nothing already applied is rolled back, since every
//! step can be rerun safely. Finalizers run afterwards whatever happened.

use crate::context::RunContext;
use crate::env::DeployEnv;
use crate::error::{DeploymentError, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, env: &DeployEnv, ctx: &mut RunContext) -> Result<()>;
}

/// Progress callbacks for whoever drives the pipeline
pub trait StepObserver: Send + Sync {
    fn started(&self, _index: usize, _total: usize, _step: &str) {}
    fn finished(&self, _step: &str, _elapsed: Duration) {}
    fn failed(&self, _step: &str, _error: &DeploymentError) {}
}

pub struct Silent;

impl StepObserver for Silent {}

#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
    finally: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Runs after the main steps, even when one of them failed
    pub fn finally(mut self, step: impl Step + 'static) -> Self {
        self.finally.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(
        &self,
        env: &DeployEnv,
        ctx: &mut RunContext,
        observer: &dyn StepObserver,
    ) -> Result<()> {
        let outcome = self.run_steps(env, ctx, observer).await;

        for step in &self.finally {
            if let Err(e) = step.run(env, ctx).await {
                warn!(step = step.name(), error = %e, "Cleanup step failed");
            }
        }

        outcome
    }

    async fn run_steps(
        &self,
        env: &DeployEnv,
        ctx: &mut RunContext,
        observer: &dyn StepObserver,
    ) -> Result<()> {
        let total = self.steps.len();
        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name();
            if env.cancel.is_cancelled() {
                let err = DeploymentError::cancelled(name);
                observer.failed(name, &err);
                return Err(err);
            }

            observer.started(index + 1, total, name);
            info!(step = name, "Starting step {}/{}", index + 1, total);
            let started = Instant::now();

            match step.run(env, ctx).await {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    info!(step = name, elapsed_ms = elapsed.as_millis() as u64, "Step complete");
                    observer.finished(name, elapsed);
                }
                Err(e) => {
                    error!(step = name, error = %e, "Step failed, aborting");
                    observer.failed(name, &e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
