//! Application image build and push
//!
//! Images are built on the master itself: the build context is synced over
//! SSH with rsync, `docker build` runs there and the result is pushed to the
//! in-cluster registry through its NodePort.

use async_trait::async_trait;
use shipyard_remote::shell::quote;
use shipyard_remote::{RemoteCommand, RemoteError, RemoteExecutor, SshConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("build context {0} does not exist")]
    MissingContext(PathBuf),

    #[error("rsync to {host} failed: {message}")]
    Sync { host: String, message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::error::StepCause for ImageError {}

/// Which image to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// `localhost:30500/{prefix}`
    pub repository: String,
    /// Timestamp tag, `%Y%m%d%H%M%S`
    pub tag: String,
}

impl ImageRequest {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    pub fn latest(&self) -> String {
        format!("{}:latest", self.repository)
    }
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the image and push both the timestamp tag and `latest`.
    /// Returns the pushed reference.
    async fn build_and_push(
        &self,
        master: &dyn RemoteExecutor,
        request: &ImageRequest,
    ) -> Result<String, ImageError>;
}

pub struct RemoteDockerBuilder {
    ssh: SshConfig,
    context_dir: PathBuf,
}

impl RemoteDockerBuilder {
    pub fn new(ssh: SshConfig, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssh,
            context_dir: context_dir.into(),
        }
    }

    fn remote_dir(request: &ImageRequest) -> String {
        let name = request
            .repository
            .rsplit('/')
            .next()
            .unwrap_or(&request.repository);
        format!("shipyard-build/{}", name)
    }

    async fn sync(&self, host: &str, remote_dir: &str) -> Result<(), ImageError> {
        if !self.context_dir.is_dir() {
            return Err(ImageError::MissingContext(self.context_dir.clone()));
        }
        info!(host = %host, dir = %self.context_dir.display(), "Syncing build context");

        let output = Command::new("rsync")
            .args(rsync_args(&self.ssh, &self.context_dir, host, remote_dir))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ImageError::Sync {
                host: host.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn rsync_args(ssh: &SshConfig, context_dir: &Path, host: &str, remote_dir: &str) -> Vec<String> {
    vec![
        "-az".to_string(),
        "--delete".to_string(),
        "--exclude".to_string(),
        ".git".to_string(),
        "-e".to_string(),
        ssh.remote_shell(),
        format!("{}/", context_dir.display()),
        format!("{}:{}/", ssh.destination(host), remote_dir),
    ]
}

fn build_script(remote_dir: &str, request: &ImageRequest) -> String {
    let reference = request.reference();
    let latest = request.latest();
    format!(
        "mkdir -p {dir} && cd {dir} && \
         docker build -t {reference} -t {latest} . && \
         docker push {reference} && docker push {latest}",
        dir = quote(remote_dir),
        reference = reference,
        latest = latest
    )
}

#[async_trait]
impl ImageBuilder for RemoteDockerBuilder {
    async fn build_and_push(
        &self,
        master: &dyn RemoteExecutor,
        request: &ImageRequest,
    ) -> Result<String, ImageError> {
        let remote_dir = Self::remote_dir(request);
        master.execute(&format!("mkdir -p {}", quote(&remote_dir))).await?;
        self.sync(master.host(), &remote_dir).await?;

        info!(image = %request.reference(), "Building image on master");
        master
            .run(RemoteCommand::new(build_script(&remote_dir, request)).streaming())
            .await?;
        info!(image = %request.reference(), "Image pushed to in-cluster registry");
        Ok(request.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ImageRequest {
        ImageRequest {
            repository: "localhost:30500/myapp".into(),
            tag: "20240101120000".into(),
        }
    }

    #[test]
    fn test_build_script_pushes_both_tags() {
        let script = build_script("shipyard-build/myapp", &request());
        assert!(script.contains("docker build -t localhost:30500/myapp:20240101120000 -t localhost:30500/myapp:latest ."));
        assert!(script.contains("docker push localhost:30500/myapp:20240101120000"));
        assert!(script.ends_with("docker push localhost:30500/myapp:latest"));
    }

    #[test]
    fn test_rsync_targets_build_dir() {
        let ssh = SshConfig::new("deploy", "/home/me/.ssh/id_ed25519");
        let args = rsync_args(&ssh, Path::new("/src/app"), "203.0.113.2", "shipyard-build/myapp");
        assert_eq!(args[args.len() - 2], "/src/app/");
        assert_eq!(args[args.len() - 1], "deploy@203.0.113.2:shipyard-build/myapp/");
        assert!(args.iter().any(|a| a.starts_with("ssh ")));
        assert_eq!(RemoteDockerBuilder::remote_dir(&request()), "shipyard-build/myapp");
    }
}
