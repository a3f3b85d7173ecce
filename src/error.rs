use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid budget request: {0}")]
    InvalidBudgetRequest(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, BudgetError>;
