use crate::comm::Connection;
use crate::handlers::fetch_system_info;
use crate::{ClientError, TopicDataStreamer};
use arrow::datatypes::Schema;
use arrow_flight::{FlightDescriptor, Ticket};
use mosaico_core::types::{Topic, pack_topic_resource_name};
use mosaico_marshal::{FlightAction, TopicMetadata, parse_endpoint_ticket};

/// Client-side handle of an existing topic.
///
/// Holds the catalog view (ontology tag, format, metadata, system info)
/// plus the endpoint ticket needed to open its data stream.
pub struct TopicHandler {
    topic: Topic,
    conn: Connection,
    ticket: Ticket,
}

impl TopicHandler {
    /// Builds the handle by querying the topic flight info and its system
    /// info.
    pub(crate) async fn connect(
        sequence_name: &str,
        topic_name: &str,
        conn: Connection,
    ) -> Result<Self, ClientError> {
        let resource_name = pack_topic_resource_name(sequence_name, topic_name);

        let descriptor = FlightDescriptor::new_path(vec![resource_name.clone()]);
        let mut client = conn.flight();
        let info = client.get_flight_info(descriptor).await?;

        let schema: Schema = info.clone().try_decode_schema()?;
        let metadata = TopicMetadata::from_schema_metadata(schema.metadata())?;

        // Locate the endpoint of this specific topic; names compare in
        // their standardized `/topic` form
        let wanted = format!("/{}", topic_name.trim_start_matches('/'));
        let mut ticket: Option<(Ticket, String)> = None;
        for endpoint in info.endpoint {
            let Some(candidate) = endpoint.ticket else {
                continue;
            };
            if let Some((_, standardized)) = parse_endpoint_ticket(&candidate.ticket)
                && standardized == wanted
            {
                ticket = Some((candidate, standardized));
                break;
            }
        }
        let Some((ticket, standardized_name)) = ticket else {
            return Err(ClientError::State(format!(
                "unable to init handler for topic {topic_name} in sequence {sequence_name}"
            )));
        };

        let system_info =
            fetch_system_info(&conn, FlightAction::TopicSystemInfo, &resource_name).await?;

        let topic = Topic::new(
            sequence_name.to_owned(),
            standardized_name,
            metadata.properties.ontology_tag,
            metadata.properties.serialization_format,
            metadata.user_metadata,
            system_info,
        );

        Ok(Self {
            topic,
            conn,
            ticket,
        })
    }

    pub fn name(&self) -> &str {
        self.topic.name()
    }

    pub fn user_metadata(&self) -> &mosaico_core::types::UserMetadata {
        self.topic.user_metadata()
    }

    /// The full catalog view of the topic.
    pub fn topic_info(&self) -> &Topic {
        &self.topic
    }

    /// Opens a fresh reader over the topic data.
    pub async fn data_streamer(&self) -> Result<TopicDataStreamer, ClientError> {
        TopicDataStreamer::connect(&self.conn, self.ticket.clone()).await
    }
}
