use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Approval callback verification failed: {0}")]
    CallbackVerification(String),

    #[error("Evidence provider error: {0}")]
    Provider(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("Stage error: {0}")]
    Stage(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Run store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
