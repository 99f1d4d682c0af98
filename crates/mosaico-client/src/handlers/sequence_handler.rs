use crate::comm::{Connection, do_action};
use crate::{ClientError, SequenceDataStreamer, TopicHandler};
use arrow::datatypes::Schema;
use arrow_flight::FlightDescriptor;
use log::error;
use mosaico_core::types::{DateTime, Sequence, SystemInfo};
use mosaico_marshal::{
    FlightAction, MarshalError, SequenceMetadata, SystemInfoResponse, parse_endpoint_ticket,
};

/// Client-side handle of an existing sequence.
///
/// Holds the catalog view built from the server (metadata, topic list,
/// system info) and creates readers on demand.
pub struct SequenceHandler {
    sequence: Sequence,
    conn: Connection,
}

impl SequenceHandler {
    /// Builds the handle by querying the sequence flight info and its
    /// system info.
    pub(crate) async fn connect(
        sequence_name: &str,
        conn: Connection,
    ) -> Result<Self, ClientError> {
        let descriptor = FlightDescriptor::new_path(vec![sequence_name.to_owned()]);
        let mut client = conn.flight();
        let info = client.get_flight_info(descriptor).await?;

        // The platform metadata travels as schema annotations
        let schema: Schema = info.clone().try_decode_schema()?;
        let metadata = SequenceMetadata::from_schema_metadata(schema.metadata())?;

        // Each endpoint ticket names one child topic
        let mut topics = Vec::with_capacity(info.endpoint.len());
        for endpoint in &info.endpoint {
            let Some(ticket) = &endpoint.ticket else {
                continue;
            };
            match parse_endpoint_ticket(&ticket.ticket) {
                Some((_, topic_name)) => topics.push(topic_name),
                None => error!("skipping endpoint with invalid ticket format: {:?}", ticket.ticket),
            }
        }

        let system_info = fetch_system_info(
            &conn,
            FlightAction::SequenceSystemInfo,
            sequence_name,
        )
        .await?;

        let sequence = Sequence::new(
            sequence_name.to_owned(),
            metadata.user_metadata,
            system_info,
            topics,
        );

        Ok(Self { sequence, conn })
    }

    pub fn name(&self) -> &str {
        self.sequence.name()
    }

    /// Names of the topics contained in the sequence, in `/topic` form.
    pub fn topics(&self) -> &[String] {
        self.sequence.topics()
    }

    pub fn user_metadata(&self) -> &mosaico_core::types::UserMetadata {
        self.sequence.user_metadata()
    }

    /// The full catalog view of the sequence.
    pub fn sequence_info(&self) -> &Sequence {
        &self.sequence
    }

    /// Opens a fresh merged reader over every topic of the sequence.
    pub async fn data_streamer(&self) -> Result<SequenceDataStreamer, ClientError> {
        SequenceDataStreamer::connect(self.sequence.name(), &self.conn).await
    }

    /// Builds a handle for one child topic of this sequence.
    pub async fn topic_handler(&self, topic_name: &str) -> Result<TopicHandler, ClientError> {
        if !self.sequence.topics().iter().any(|name| name == topic_name) {
            return Err(ClientError::State(format!(
                "topic '{topic_name}' not available in sequence '{}'",
                self.sequence.name()
            )));
        }
        TopicHandler::connect(self.sequence.name(), topic_name, self.conn.clone()).await
    }
}

/// Runs a `*_system_info` action and converts the response into the catalog
/// representation.
pub(crate) async fn fetch_system_info(
    conn: &Connection,
    action: FlightAction,
    resource_name: &str,
) -> Result<SystemInfo, ClientError> {
    let response: Option<SystemInfoResponse> = do_action(
        conn,
        action,
        serde_json::json!({ "name": resource_name }),
    )
    .await
    .map_err(|e| ClientError::action_failed(action.as_str(), resource_name, e))?;

    let response = response.ok_or(ClientError::NoResponse(action.as_str()))?;

    let created_datetime = DateTime::parse(&response.created_datetime).ok_or_else(|| {
        ClientError::Protocol(MarshalError::DeserializationError(format!(
            "invalid creation datetime `{}`",
            response.created_datetime
        )))
    })?;

    Ok(SystemInfo {
        total_size_bytes: response.total_size_bytes,
        is_locked: response.is_locked,
        created_datetime,
        chunks_number: response.chunks_number,
    })
}
