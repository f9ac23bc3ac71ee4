use thiserror::Error;

#[derive(Error, Debug)]
pub enum AikaraError {
    #[error("API request failed: {0}")]
    ApiRequest(String),

    #[error("Inference service unavailable at {url}: {reason}. Is Ollama running?")]
    InferenceUnavailable { url: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding dimension mismatch: store uses {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dialog error: {0}")]
    Dialog(String),
}

impl From<dialoguer::Error> for AikaraError {
    fn from(err: dialoguer::Error) -> Self {
        AikaraError::Dialog(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AikaraError>;
