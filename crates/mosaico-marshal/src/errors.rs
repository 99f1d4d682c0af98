use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("deserialization error :: {0}")]
    DeserializationError(String),

    #[error("serialization error :: {0}")]
    SerializationError(String),

    #[error("missing metadata key `{0}`")]
    MissingKey(String),

    #[error("expected a {expected} context, got `{got}`")]
    BadContext { expected: &'static str, got: String },

    #[error("action `{action}` returned an unexpected response :: {reason}")]
    UnexpectedResponse { action: String, reason: String },
}
