use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unexpected node kind for {key}: expected {expected}, found {found}")]
    UnexpectedNodeKind {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
