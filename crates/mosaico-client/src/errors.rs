use mosaico_core::types::ResourceError;
use mosaico_marshal::MarshalError;
use mosaico_model::ModelError;
use mosaico_query::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection to flight server at {addr} failed :: {reason}")]
    Connect { addr: String, reason: String },

    #[error("{0} pool size must be at least 1")]
    PoolSize(&'static str),

    #[error("{0} pool is not initialized or has been closed")]
    PoolClosed(&'static str),

    #[error("worker lane has been shut down")]
    LaneClosed,

    #[error("action `{action}` failed for resource `{resource}` :: {source}")]
    ActionFailed {
        action: &'static str,
        resource: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("action `{0}` returned no response")]
    NoResponse(&'static str),

    #[error("topic `{topic}` operation failed :: {context} :: {source}")]
    TopicOperation {
        topic: String,
        context: &'static str,
        #[source]
        source: Box<ClientError>,
    },

    #[error("errors occurred closing topics :: {failed} topic(s) failed to finalize, first: {first}")]
    TopicFinalize {
        failed: usize,
        first: Box<ClientError>,
    },

    #[error("state error :: {0}")]
    State(String),

    #[error("schema error :: {0}")]
    Schema(String),

    #[error("transport error :: {0}")]
    Transport(String),

    #[error("protocol error :: {0}")]
    Protocol(#[from] MarshalError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl ClientError {
    pub(crate) fn action_failed(
        action: &'static str,
        resource: impl Into<String>,
        source: ClientError,
    ) -> Self {
        Self::ActionFailed {
            action,
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn topic_operation(
        topic: impl Into<String>,
        context: &'static str,
        source: ClientError,
    ) -> Self {
        Self::TopicOperation {
            topic: topic.into(),
            context,
            source: Box::new(source),
        }
    }
}

impl From<arrow_flight::error::FlightError> for ClientError {
    fn from(value: arrow_flight::error::FlightError) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<tonic::Status> for ClientError {
    fn from(value: tonic::Status) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<arrow::error::ArrowError> for ClientError {
    fn from(value: arrow::error::ArrowError) -> Self {
        Self::Transport(value.to_string())
    }
}
