use thiserror::Error;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Stage error: {0}")]
    StageError(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Preview error: {0}")]
    PreviewError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Service error: {0}")]
    ServiceError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for CascadeError {
    fn from(e: serde_json::Error) -> Self {
        CascadeError::SerializationError(e.to_string())
    }
}

impl CascadeError {
    /// True for failures caused by the caller's input rather than the pipeline.
    pub fn is_validation(&self) -> bool {
        matches!(self, CascadeError::ValidationError(_))
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
