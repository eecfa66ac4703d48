//! Remote execution error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// The transport never reached the host (ssh exit code 255, refused, timed out)
    #[error("Connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// The command ran and exited non-zero
    #[error("Command failed on {host} (exit code {}): {command}\n{output}", exit_label(.exit_code))]
    Command {
        host: String,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_connection(&self) -> bool {
        matches!(self, RemoteError::Connection { .. })
    }

    pub fn is_command(&self) -> bool {
        matches!(self, RemoteError::Command { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

pub type Result<T> = std::result::Result<T, RemoteError>;
