use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Rejected before any call to Ollama or Qdrant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    /// Stale chunks of `document` were already deleted when this happened.
    #[error("ingestion of {document} failed after its previous chunks were removed: {reason}")]
    PartialIngestion {
        document: String,
        #[source]
        reason: Box<RagError>,
    },
}

impl RagError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidInput(message.into())
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        RagError::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, RagError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
