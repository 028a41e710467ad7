use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Key '{0}' is empty")]
    MissingKey(&'static str),

    #[error("Kube API Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Watch Error: {0}")]
    WatchError(#[from] kube::runtime::watcher::Error),

    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Environment config Error: {0}")]
    EnvConfigError(#[from] envy::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid application key '{0}'")]
    InvalidKey(String),

    #[error("Status update of '{key}' still conflicting after {attempts} attempts")]
    StatusUpdateConflict { key: String, attempts: u32 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Submission queue is full, dropped submission of '{0}'")]
    SubmissionQueueFull(String),

    #[error("Submission queue is closed")]
    SubmissionQueueClosed,

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether the work that failed with this error should be attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 409 || resp.code >= 500,
            Error::KubeError(_) => true,
            Error::StatusUpdateConflict { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
