use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Body is not a three-segment signed envelope, or the payload inside it
    /// is not a webhook document.
    #[error("transport: {0}")]
    Transport(String),

    #[error("webhook signature: {0}")]
    Auth(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider: {0}")]
    Provider(String),

    #[error("{collaborator}: {message}")]
    Downstream {
        collaborator: &'static str,
        message: String,
    },

    #[error("config: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn downstream(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Downstream {
            collaborator,
            message: message.into(),
        }
    }
}
