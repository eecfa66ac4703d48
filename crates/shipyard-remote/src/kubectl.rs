//! kubectl operations over a remote executor

use crate::error::Result;
use crate::executor::{RemoteCommand, RemoteExecutor};
use crate::shell::quote;

/// Thin wrapper issuing `kubectl` on the cluster host behind `exec`
pub struct Kubectl<'a> {
    exec: &'a dyn RemoteExecutor,
}

impl<'a> Kubectl<'a> {
    pub fn new(exec: &'a dyn RemoteExecutor) -> Self {
        Self { exec }
    }

    /// `kubectl apply -f -` with the manifest fed through a quoted heredoc
    pub async fn apply(&self, manifest: &str) -> Result<String> {
        self.exec.execute(&apply_script(manifest)).await
    }

    /// Same as [`Kubectl::apply`] but masks `secret` in logs and errors
    pub async fn apply_sensitive(&self, manifest: &str, secret: &str) -> Result<String> {
        self.exec
            .run(RemoteCommand::new(apply_script(manifest)).redacting(secret))
            .await
    }

    pub async fn apply_url(&self, url: &str) -> Result<String> {
        self.exec
            .run(RemoteCommand::new(format!("kubectl apply -f {}", url)).streaming())
            .await
    }

    pub async fn get_jsonpath(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        jsonpath: &str,
    ) -> Result<String> {
        let output = self
            .exec
            .execute(&format!(
                "kubectl get {} {} -n {} -o jsonpath='{}'",
                kind, name, namespace, jsonpath
            ))
            .await?;
        Ok(output.trim().trim_matches('\'').to_string())
    }

    pub async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout_secs: u64,
    ) -> Result<String> {
        self.exec
            .execute(&format!(
                "kubectl rollout status {}/{} -n {} --timeout={}s",
                kind, name, namespace, timeout_secs
            ))
            .await
    }

    /// `kubectl get nodes -o name`, with the `node/` prefix stripped
    pub async fn node_names(&self) -> Result<Vec<String>> {
        let output = self.exec.execute("kubectl get nodes -o name").await?;
        Ok(output
            .lines()
            .map(|l| l.trim().trim_start_matches("node/").to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn first_node_name(&self) -> Result<String> {
        let output = self
            .exec
            .execute("kubectl get nodes -o jsonpath='{.items[0].metadata.name}'")
            .await?;
        Ok(output.trim().trim_matches('\'').to_string())
    }

    pub async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<String> {
        self.exec
            .execute(&format!(
                "kubectl label node {} {}={} --overwrite",
                node, key, value
            ))
            .await
    }

    pub async fn first_pod(&self, selector: &str, namespace: &str) -> Result<String> {
        let output = self
            .exec
            .execute(&format!(
                "kubectl get pod -l {} -n {} -o jsonpath='{{.items[0].metadata.name}}'",
                selector, namespace
            ))
            .await?;
        Ok(output.trim().trim_matches('\'').to_string())
    }

    pub async fn exec_in_pod(&self, pod: &str, namespace: &str, command: &str) -> Result<String> {
        self.exec
            .execute(&format!(
                "kubectl exec -n {} {} -- sh -c {}",
                namespace,
                pod,
                quote(command)
            ))
            .await
    }

    pub async fn logs(&self, pod: &str, namespace: &str, tail: u32) -> Result<String> {
        self.exec
            .execute(&format!(
                "kubectl logs {} -n {} --tail={}",
                pod, namespace, tail
            ))
            .await
    }
}

fn apply_script(manifest: &str) -> String {
    format!(
        "cat <<'EOF' | kubectl apply -f -\n{}\nEOF",
        manifest.trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_script_uses_quoted_heredoc() {
        let script = apply_script("kind: Namespace\n");
        assert!(script.starts_with("cat <<'EOF' | kubectl apply -f -\n"));
        assert!(script.ends_with("kind: Namespace\nEOF"));
    }
}
