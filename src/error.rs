//! Error types for variance-decoder.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// An input's batch/channel/time dimensions disagree with the model or
    /// with the other inputs of the same call.
    #[error("shape mismatch for {name}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    /// Token id outside the embedding table.
    #[error("token id {id} out of range for embedding table of size {num_embeddings}")]
    InvalidTokenId { id: i64, num_embeddings: usize },

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(name: &'static str, expected: impl Into<String>, actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            name,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}
