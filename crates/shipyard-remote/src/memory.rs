//! Scripted in-memory executor for tests
//!
//! Commands are matched by substring against registered rules, most recently
//! registered first. Unmatched commands succeed with empty output.

use crate::error::{RemoteError, Result};
use crate::executor::{RemoteCommand, RemoteConnector, RemoteExecutor};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail(String),
    Unreachable,
}

impl Reply {
    pub fn ok(output: impl Into<String>) -> Self {
        Reply::Ok(output.into())
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Reply::Fail(output.into())
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

impl Rule {
    fn next(&mut self) -> Reply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or(Reply::Ok(String::new()))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or(Reply::Ok(String::new()))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct ScriptedExecutor {
    host: String,
    rules: Mutex<Vec<Rule>>,
    history: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            rules: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Commands containing `pattern` succeed with `output`
    pub fn on(&self, pattern: &str, output: &str) -> &Self {
        self.on_sequence(pattern, vec![Reply::ok(output)])
    }

    /// Commands containing `pattern` exit non-zero
    pub fn fail_on(&self, pattern: &str) -> &Self {
        self.on_sequence(pattern, vec![Reply::fail("exit status 1")])
    }

    /// Successive matches consume `replies` in order; the last one repeats
    pub fn on_sequence(&self, pattern: &str, replies: Vec<Reply>) -> &Self {
        lock(&self.rules).push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Every command issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        lock(&self.history).clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    pub fn count(&self, pattern: &str) -> usize {
        lock(&self.history)
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Index of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        lock(&self.history).iter().position(|c| c.contains(pattern))
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: RemoteCommand) -> Result<String> {
        let script = command.script().to_string();
        lock(&self.history).push(script.clone());

        let reply = {
            let mut rules = lock(&self.rules);
            rules
                .iter_mut()
                .rev()
                .find(|r| script.contains(&r.pattern))
                .map(Rule::next)
        };

        match reply {
            None => Ok(String::new()),
            Some(Reply::Ok(output)) => Ok(output.trim().to_string()),
            Some(Reply::Fail(output)) => Err(RemoteError::Command {
                host: self.host.clone(),
                command: command.display(),
                exit_code: Some(1),
                output,
            }),
            Some(Reply::Unreachable) => Err(RemoteError::Connection {
                host: self.host.clone(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Hands out one shared [`ScriptedExecutor`] per host
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    hosts: Mutex<HashMap<String, Arc<ScriptedExecutor>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor for `host`, created on first use
    pub fn executor(&self, host: &str) -> Arc<ScriptedExecutor> {
        lock(&self.hosts)
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(ScriptedExecutor::new(host)))
            .clone()
    }
}

impl RemoteConnector for ScriptedConnector {
    fn connect(&self, host: &str) -> Arc<dyn RemoteExecutor> {
        self.executor(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_rule_wins_and_sequences_repeat_last() {
        let exec = ScriptedExecutor::new("10.0.0.2");
        exec.on("systemctl", "inactive");
        exec.on_sequence(
            "systemctl is-active k3s",
            vec![Reply::fail("inactive"), Reply::ok("active")],
        );

        assert!(exec.execute("systemctl is-active k3s").await.is_err());
        assert_eq!(exec.execute("systemctl is-active k3s").await.unwrap(), "active");
        assert_eq!(exec.execute("systemctl is-active k3s").await.unwrap(), "active");
        assert_eq!(exec.execute("systemctl status docker").await.unwrap(), "inactive");
        assert_eq!(exec.count("is-active k3s"), 3);
    }

    #[tokio::test]
    async fn test_unreachable_is_connection_error() {
        let exec = ScriptedExecutor::new("10.0.0.2");
        exec.on_sequence("echo ready", vec![Reply::Unreachable]);
        let err = exec.execute("echo ready").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_connector_reuses_executor_per_host() {
        let connector = ScriptedConnector::new();
        let a = connector.executor("1.2.3.4");
        a.on("hostname", "master");
        let b = connector.executor("1.2.3.4");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
