//! containerd image housekeeping via `ctr`

use crate::executor::RemoteExecutor;

const NAMESPACE: &str = "k8s.io";

pub struct Containerd<'a> {
    exec: &'a dyn RemoteExecutor,
}

impl<'a> Containerd<'a> {
    pub fn new(exec: &'a dyn RemoteExecutor) -> Self {
        Self { exec }
    }

    /// Image references matching `filter`, newest tag first.
    ///
    /// An empty list is returned when nothing matches (grep exits 1).
    pub async fn list_images(&self, filter: &str) -> Vec<String> {
        let script = format!(
            "sudo ctr -n {} images ls -q | grep '{}' | sort -r",
            NAMESPACE, filter
        );
        match self.exec.execute(&script).await {
            Ok(output) => output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "No images listed");
                Vec::new()
            }
        }
    }

    /// Best-effort removal; returns whether `ctr` succeeded
    pub async fn remove_image(&self, reference: &str) -> bool {
        self.exec
            .execute_ignore_errors(&format!(
                "sudo ctr -n {} images rm {}",
                NAMESPACE, reference
            ))
            .await
            .is_some()
    }
}
