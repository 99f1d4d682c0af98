use crate::comm::Connection;
use crate::{ClientError, TopicDataStreamer};
use arrow_flight::FlightDescriptor;
use log::{info, warn};
use mosaico_core::types::Timestamp;
use mosaico_model::Message;
use std::collections::BTreeMap;

/// Reads a whole sequence as one time-ordered stream.
///
/// One [`TopicDataStreamer`] is opened per endpoint returned by the
/// sequence flight info. Every step of the iteration peeks the next
/// timestamp of each child and yields the minimum, restoring global time
/// order across topics recorded at different rates. Ties land on the
/// lexicographically first topic name.
pub struct SequenceDataStreamer {
    name: String,
    readers: BTreeMap<String, TopicDataStreamer>,
}

impl SequenceDataStreamer {
    pub(crate) fn new(name: impl Into<String>, readers: BTreeMap<String, TopicDataStreamer>) -> Self {
        Self {
            name: name.into(),
            readers,
        }
    }

    /// Queries the server for the sequence endpoints and opens a topic
    /// stream for each one.
    pub(crate) async fn connect(
        sequence_name: &str,
        conn: &Connection,
    ) -> Result<Self, ClientError> {
        let descriptor = FlightDescriptor::new_path(vec![sequence_name.to_owned()]);
        let mut client = conn.flight();
        let info = client.get_flight_info(descriptor).await?;

        let mut readers = BTreeMap::new();
        for endpoint in info.endpoint {
            let Some(ticket) = endpoint.ticket else {
                continue;
            };
            let reader = TopicDataStreamer::connect(conn, ticket).await?;
            readers.insert(reader.name().to_owned(), reader);
        }

        if readers.is_empty() {
            return Err(ClientError::State(format!(
                "unable to open topic streams for sequence {sequence_name}"
            )));
        }

        Ok(Self::new(sequence_name, readers))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the topics taking part in the merge.
    pub fn topics(&self) -> Vec<&str> {
        self.readers.keys().map(String::as_str).collect()
    }

    /// Makes sure every child has a row peeked (or is known exhausted).
    ///
    /// A child failing here is closed and excluded from the merge, the
    /// remaining topics keep streaming.
    async fn ensure_peeked(&mut self) {
        for (topic_name, reader) in self.readers.iter_mut() {
            if reader.state().has_peeked() {
                continue;
            }
            if let Err(e) = reader.state_mut().peek_next_row().await {
                warn!("error reading from topic '{topic_name}', excluded from the merge :: {e}");
                reader.close();
            }
        }
    }

    /// The child holding the smallest peeked timestamp.
    fn min_topic(&self) -> Option<String> {
        let mut min_ts = Timestamp::unbounded_pos();
        let mut winner = None;

        for (topic_name, reader) in &self.readers {
            let ts = reader.state().peeked_timestamp();
            if ts < min_ts {
                min_ts = ts;
                winner = Some(topic_name.clone());
            }
        }

        winner
    }

    /// The next record in global time order, as `(topic_name, message)`.
    /// `None` once every child stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<(String, Message)>, ClientError> {
        self.ensure_peeked().await;

        let Some(winner) = self.min_topic() else {
            return Ok(None);
        };
        let Some(reader) = self.readers.get_mut(&winner) else {
            return Ok(None);
        };

        let Some(row) = reader.state().peeked_row()? else {
            return Ok(None);
        };
        let message = Message::from_row(reader.state().ontology_tag(), &row)?;

        if let Err(e) = reader.state_mut().advance().await {
            warn!("error advancing topic '{winner}', excluded from the merge :: {e}");
            reader.close();
        }

        Ok(Some((winner, message)))
    }

    /// The timestamp the next [`SequenceDataStreamer::next`] call would
    /// yield, without advancing any child.
    pub async fn next_timestamp(&mut self) -> Result<Option<Timestamp>, ClientError> {
        self.ensure_peeked().await;

        let min = self
            .readers
            .values()
            .map(|reader| reader.state().peeked_timestamp())
            .min()
            .unwrap_or_else(Timestamp::unbounded_pos);

        Ok((!min.is_unbounded_pos()).then_some(min))
    }

    /// Closes every child stream. Never raises.
    pub fn close(&mut self) {
        for reader in self.readers.values_mut() {
            reader.close();
        }
        info!("sequence reader for '{}' closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TopicReadState;
    use crate::test_support::{MockSource, TestImu, imu_batch, register_test_ontologies};
    use mosaico_model::Ontology;

    fn reader_over(timestamps: &[i64]) -> TopicDataStreamer {
        reader_from_source(MockSource::new(vec![imu_batch(timestamps)]))
    }

    fn reader_from_source(source: MockSource) -> TopicDataStreamer {
        register_test_ontologies();
        let schema = Message::combined_schema_of::<TestImu>().unwrap();
        let state =
            TopicReadState::new("/x", TestImu::TAG, Box::new(source), &schema).unwrap();
        TopicDataStreamer::new(state)
    }

    fn merger(children: Vec<(&str, TopicDataStreamer)>) -> SequenceDataStreamer {
        let readers = children
            .into_iter()
            .map(|(name, reader)| (name.to_owned(), reader))
            .collect();
        SequenceDataStreamer::new("seq", readers)
    }

    #[tokio::test]
    async fn merge_restores_time_order() {
        let mut streamer = merger(vec![
            ("/a", reader_over(&[1, 3, 5])),
            ("/b", reader_over(&[2, 4, 6])),
        ]);

        let mut merged = Vec::new();
        while let Some((topic, message)) = streamer.next().await.unwrap() {
            merged.push((topic, message.timestamp_ns()));
        }

        assert_eq!(
            merged,
            vec![
                ("/a".to_owned(), 1),
                ("/b".to_owned(), 2),
                ("/a".to_owned(), 3),
                ("/b".to_owned(), 4),
                ("/a".to_owned(), 5),
                ("/b".to_owned(), 6),
            ]
        );
    }

    #[tokio::test]
    async fn merged_timestamps_are_non_decreasing() {
        let mut streamer = merger(vec![
            ("/a", reader_over(&[10, 11, 40, 41])),
            ("/b", reader_over(&[5, 25, 45])),
            ("/c", reader_over(&[24, 26])),
        ]);

        let mut last = i64::MIN;
        let mut count = 0;
        while let Some((_, message)) = streamer.next().await.unwrap() {
            assert!(message.timestamp_ns() >= last);
            last = message.timestamp_ns();
            count += 1;
        }
        assert_eq!(count, 9);
    }

    #[tokio::test]
    async fn ties_break_on_topic_name_order() {
        let mut streamer = merger(vec![
            ("/b", reader_over(&[7])),
            ("/a", reader_over(&[7])),
        ]);

        let (first, _) = streamer.next().await.unwrap().unwrap();
        assert_eq!(first, "/a");
        let (second, _) = streamer.next().await.unwrap().unwrap();
        assert_eq!(second, "/b");
    }

    #[tokio::test]
    async fn next_timestamp_does_not_advance() {
        let mut streamer = merger(vec![
            ("/a", reader_over(&[3])),
            ("/b", reader_over(&[1, 2])),
        ]);

        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(1.into()));
        assert_eq!(streamer.next_timestamp().await.unwrap(), Some(1.into()));

        let (topic, message) = streamer.next().await.unwrap().unwrap();
        assert_eq!(topic, "/b");
        assert_eq!(message.timestamp_ns(), 1);
    }

    #[tokio::test]
    async fn failing_child_is_isolated() {
        let failing = reader_from_source(MockSource::new(vec![imu_batch(&[1])]).failing_after(1));

        let mut streamer = merger(vec![
            ("/bad", failing),
            ("/good", reader_over(&[2, 3])),
        ]);

        let mut merged = Vec::new();
        while let Some((topic, message)) = streamer.next().await.unwrap() {
            merged.push((topic, message.timestamp_ns()));
        }

        // The failing child delivered its first row, then dropped out
        // without terminating the merge
        assert_eq!(
            merged,
            vec![
                ("/bad".to_owned(), 1),
                ("/good".to_owned(), 2),
                ("/good".to_owned(), 3),
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_merge_reports_none() {
        let mut streamer = merger(vec![("/a", reader_over(&[]))]);
        assert_eq!(streamer.next_timestamp().await.unwrap(), None);
        assert!(streamer.next().await.unwrap().is_none());
        streamer.close();
    }
}
