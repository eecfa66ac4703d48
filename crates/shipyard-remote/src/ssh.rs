//! SSH transport
//!
//! Wraps the system `ssh` client. Host key checking is relaxed by default since
//! freshly provisioned servers reuse recycled IPs; set
//! `SSH_STRICT_HOST_KEY_CHECKING=true` to accept-new into `~/.ssh/known_hosts`.

use crate::error::{RemoteError, Result};
use crate::executor::{RemoteCommand, RemoteConnector, RemoteExecutor};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// ssh reserves exit status 255 for its own failures
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Lines of streamed output kept for error reporting
const STREAM_TAIL_LINES: usize = 40;

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    pub private_key: PathBuf,
    pub strict_host_key_checking: bool,
    pub connect_timeout_secs: u32,
}

impl SshConfig {
    pub fn new(user: impl Into<String>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            private_key: private_key.into(),
            strict_host_key_checking: std::env::var("SSH_STRICT_HOST_KEY_CHECKING")
                .map(|v| v == "true")
                .unwrap_or(false),
            connect_timeout_secs: 10,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-i".to_string(),
            self.private_key.display().to_string(),
        ];

        if self.strict_host_key_checking {
            let known_hosts = known_hosts_path();
            args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
                "-o".to_string(),
                format!("UserKnownHostsFile={}", known_hosts.display()),
            ]);
        } else {
            args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ]);
        }

        args
    }

    /// `ssh ...` invocation for tools that take a remote shell (`rsync -e`)
    pub fn remote_shell(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.base_args());
        parts.join(" ")
    }

    pub fn destination(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }
}

fn known_hosts_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".ssh")
        .join("known_hosts")
}

/// One SSH session target
pub struct SshExecutor {
    host: String,
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>, config: SshConfig) -> Self {
        Self {
            host: host.into(),
            config,
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.config.private_key
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.config.base_args());
        cmd.arg(self.config.destination(&self.host));
        cmd.arg(script);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn classify(&self, command: &RemoteCommand, code: Option<i32>, output: String) -> RemoteError {
        if code == Some(SSH_CONNECTION_FAILURE) {
            return RemoteError::Connection {
                host: self.host.clone(),
                message: output.trim().to_string(),
            };
        }

        RemoteError::Command {
            host: self.host.clone(),
            command: command.display(),
            exit_code: code,
            output: output.trim().to_string(),
        }
    }

    async fn run_captured(&self, command: &RemoteCommand) -> Result<String> {
        let output = self.command(command.script()).output().await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(self.classify(command, output.status.code(), combined));
        }

        Ok(combined.trim().to_string())
    }

    async fn run_streaming(&self, command: &RemoteCommand) -> Result<String> {
        let mut child = self.command(command.script()).spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let host = self.host.clone();

        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });

        let mut tail: Vec<String> = Vec::new();
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                tracing::info!(host = %host, "{}", line);
                tail.push(line);
                if tail.len() > STREAM_TAIL_LINES {
                    tail.remove(0);
                }
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let mut output = tail.join("\n");
            output.push('\n');
            output.push_str(&stderr_output);
            return Err(self.classify(command, status.code(), output));
        }

        Ok(String::new())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: RemoteCommand) -> Result<String> {
        tracing::debug!("Running on {}: {}", self.host, command.display());

        if command.is_streaming() {
            self.run_streaming(&command).await
        } else {
            self.run_captured(&command).await
        }
    }
}

/// Opens [`SshExecutor`]s with a shared [`SshConfig`]
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

impl RemoteConnector for SshConnector {
    fn connect(&self, host: &str) -> Arc<dyn RemoteExecutor> {
        Arc::new(SshExecutor::new(host, self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SshConfig {
        SshConfig {
            user: "deploy".to_string(),
            private_key: PathBuf::from("/keys/id_ed25519"),
            strict_host_key_checking: false,
            connect_timeout_secs: 10,
        }
    }

    #[test]
    fn test_base_args_relaxed() {
        let args = config().base_args();
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert!(args.contains(&"/keys/id_ed25519".to_string()));
    }

    #[test]
    fn test_base_args_strict() {
        let mut config = config();
        config.strict_host_key_checking = true;
        let args = config.base_args();
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
    }

    #[test]
    fn test_exit_255_is_connection_error() {
        let executor = SshExecutor::new("203.0.113.10", config());
        let err = executor.classify(
            &RemoteCommand::new("true"),
            Some(255),
            "ssh: connect to host 203.0.113.10 port 22: Connection refused\n".to_string(),
        );
        assert!(err.is_connection());
    }

    #[test]
    fn test_command_error_redacts_secrets() {
        let executor = SshExecutor::new("203.0.113.10", config());
        let command = RemoteCommand::new("K3S_TOKEN=K10abcdef sh -s - agent").redacting("K10abcdef");
        let err = executor.classify(&command, Some(1), "boom".to_string());
        let message = err.to_string();
        assert!(err.is_command());
        assert!(!message.contains("K10abcdef"));
        assert!(message.contains("K3S_TOKEN=***"));
    }
}
