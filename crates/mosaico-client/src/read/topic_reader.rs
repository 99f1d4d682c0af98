use crate::comm::{Connection, FlightGetStream};
use crate::{ClientError, TopicReadState};
use arrow_flight::Ticket;
use log::info;
use mosaico_core::types::Timestamp;
use mosaico_marshal::{MarshalError, TopicMetadata, parse_endpoint_ticket};
use mosaico_model::Message;

/// Streams the messages of a single topic, in stream order.
///
/// Wraps the one-row peek state so the caller (or the sequence-level
/// merger) can inspect the next timestamp without consuming it.
pub struct TopicDataStreamer {
    state: TopicReadState,
}

impl TopicDataStreamer {
    pub(crate) fn new(state: TopicReadState) -> Self {
        Self { state }
    }

    /// Opens the download stream addressed by an endpoint ticket.
    ///
    /// The annotated stream schema tells which ontology deserializes the
    /// rows.
    pub(crate) async fn connect(conn: &Connection, ticket: Ticket) -> Result<Self, ClientError> {
        let (_, topic_name) = parse_endpoint_ticket(&ticket.ticket).ok_or_else(|| {
            ClientError::Protocol(MarshalError::DeserializationError(format!(
                "invalid endpoint ticket format: {:?}",
                ticket.ticket
            )))
        })?;

        let (source, schema) = FlightGetStream::open(conn, ticket).await?;
        let metadata = TopicMetadata::from_schema_metadata(schema.metadata())?;

        let state = TopicReadState::new(
            topic_name,
            metadata.properties.ontology_tag,
            Box::new(source),
            &schema,
        )?;

        Ok(Self::new(state))
    }

    pub fn name(&self) -> &str {
        self.state.topic_name()
    }

    pub fn ontology_tag(&self) -> &str {
        self.state.ontology_tag()
    }

    pub(crate) fn state(&self) -> &TopicReadState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TopicReadState {
        &mut self.state
    }

    /// The timestamp of the next record, without consuming it. `None` once
    /// the stream is exhausted.
    pub async fn next_timestamp(&mut self) -> Result<Option<Timestamp>, ClientError> {
        if !self.state.has_peeked() && !self.state.peek_next_row().await? {
            return Ok(None);
        }

        let ts = self.state.peeked_timestamp();
        Ok((!ts.is_unbounded_pos()).then_some(ts))
    }

    /// The next message of the stream, or `None` once exhausted.
    pub async fn next(&mut self) -> Result<Option<Message>, ClientError> {
        if !self.state.has_peeked() && !self.state.peek_next_row().await? {
            return Ok(None);
        }

        let Some(row) = self.state.peeked_row()? else {
            return Ok(None);
        };
        let message = Message::from_row(self.state.ontology_tag(), &row)?;

        // Advance only after the row has been materialized
        self.state.advance().await?;

        Ok(Some(message))
    }

    /// Cancels the underlying stream. Safe to call more than once.
    pub fn close(&mut self) {
        self.state.close();
        info!("topic reader for '{}' closed", self.state.topic_name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockSource, TestImu, imu_batch, register_test_ontologies};
    use mosaico_model::Ontology;

    fn streamer_over(timestamps: &[i64]) -> TopicDataStreamer {
        register_test_ontologies();
        let schema = Message::combined_schema_of::<TestImu>().unwrap();
        let state = TopicReadState::new(
            "/imu",
            TestImu::TAG,
            Box::new(MockSource::new(vec![imu_batch(timestamps)])),
            &schema,
        )
        .unwrap();
        TopicDataStreamer::new(state)
    }

    #[tokio::test]
    async fn yields_messages_in_stream_order() {
        let mut streamer = streamer_over(&[100, 200, 300]);

        let mut stamps = Vec::new();
        while let Some(message) = streamer.next().await.unwrap() {
            assert!(message.data_as::<TestImu>().is_some());
            stamps.push(message.timestamp_ns());
        }
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn next_timestamp_does_not_consume() {
        let mut streamer = streamer_over(&[42, 43]);

        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(42.into()));
        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(42.into()));

        let message = streamer.next().await.unwrap().unwrap();
        assert_eq!(message.timestamp_ns(), 42);
        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(43.into()));
    }

    #[tokio::test]
    async fn exhausted_stream_reports_none() {
        let mut streamer = streamer_over(&[]);
        assert_eq!(streamer.next_timestamp().await.unwrap(), None);
        assert!(streamer.next().await.unwrap().is_none());
    }
}
