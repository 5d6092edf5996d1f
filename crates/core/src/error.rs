use thiserror::Error;

pub type CohortResult<T> = Result<T, CohortError>;

#[derive(Error, Debug)]
pub enum CohortError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("CSV parse error: {0}")]
    Csv(String),

    #[error("Chart rendering error: {0}")]
    Chart(String),

    #[error("Insights error: {0}")]
    Insights(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CohortError {
    /// Wrap any failure as a validation error with stage context, so one
    /// error taxonomy reaches the caller regardless of which stage tripped.
    pub fn stage(stage: &str, message: impl std::fmt::Display) -> Self {
        Self::Validation(format!("{stage}: {message}"))
    }
}
