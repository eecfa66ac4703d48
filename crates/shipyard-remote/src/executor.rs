//! Remote executor trait definition

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A shell command to run on a remote host.
///
/// Secrets registered with [`RemoteCommand::redacting`] are masked in
/// [`RemoteCommand::display`], which is what executors log and put into
/// error messages.
#[derive(Clone)]
pub struct RemoteCommand {
    script: String,
    stream: bool,
    secrets: Vec<String>,
}

impl RemoteCommand {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            stream: false,
            secrets: Vec::new(),
        }
    }

    /// Surface output line by line while the command runs (long installs)
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn redacting(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn display(&self) -> String {
        self.secrets
            .iter()
            .fold(self.script.clone(), |acc, secret| acc.replace(secret, "***"))
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("script", &self.display())
            .field("stream", &self.stream)
            .finish()
    }
}

/// Runs shell commands on one host.
///
/// Every implementation returns the trimmed combined output on success and a
/// [`crate::RemoteError::Command`] when the command exits non-zero.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Host this executor talks to (IP or hostname)
    fn host(&self) -> &str;

    async fn run(&self, command: RemoteCommand) -> Result<String>;

    async fn execute(&self, script: &str) -> Result<String> {
        self.run(RemoteCommand::new(script)).await
    }

    /// Run a command and discard any failure
    async fn execute_ignore_errors(&self, script: &str) -> Option<String> {
        match self.execute(script).await {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::debug!(host = %self.host(), error = %e, "Ignoring remote command failure");
                None
            }
        }
    }
}

/// Opens executors for hosts.
///
/// Each call yields a fresh session; sessions are not pooled or shared.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, host: &str) -> Arc<dyn RemoteExecutor>;
}
