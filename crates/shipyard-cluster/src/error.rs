use shipyard_cloud::PollError;
use shipyard_core::ManifestError;
use shipyard_remote::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("cloud-init timeout on {host} after {attempts} attempts")]
    CloudInitTimeout { host: String, attempts: u32 },

    #[error("{component} not ready after {attempts} attempts")]
    NotReady { component: String, attempts: u32 },

    #[error("cluster token is empty")]
    EmptyToken,

    #[error("private IP not found on {host}")]
    MissingPrivateIp { host: String },

    #[error("master server not found: {0}")]
    MasterNotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("{0} cancelled")]
    Cancelled(String),
}

impl ClusterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClusterError::Cancelled(_))
    }
}

impl From<PollError<ClusterError>> for ClusterError {
    fn from(err: PollError<ClusterError>) -> Self {
        match err {
            PollError::Exhausted { what, attempts } => ClusterError::NotReady {
                component: what,
                attempts,
            },
            PollError::Cancelled { what } => ClusterError::Cancelled(what),
            PollError::Probe(e) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
