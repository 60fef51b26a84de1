use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("snapshot decode failed: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    SnapshotVersion(u32),
    #[error("annotation range is empty")]
    EmptyAnnotation,
    #[error("executor is stopped")]
    ExecutorStopped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TerminalError>;
