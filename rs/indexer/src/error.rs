use thiserror::Error;

/// Failure kinds across the whole orchestration. CLI-layer kinds are produced
/// before any file is opened; I/O kinds come from the vocabulary and point
/// readers; `Build` wraps whatever the index builder reports.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("unknown option: {0}")]
    Usage(String),

    #[error("missing argument for option '{0}'")]
    MissingArgument(String),

    #[error("malformed option value: {0}")]
    OptionSyntax(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("malformed file {path}: {reason}")]
    FileFormat { path: String, reason: String },

    #[error("index build failed: {0}")]
    Build(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
