use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Placement error: {0}")]
    Placement(String),

    #[error("Artifact staging failed: {0}")]
    Staging(String),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error is raised before any task is dispatched.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::UnknownOperation(_) | Error::Staging(_)
        )
    }
}
