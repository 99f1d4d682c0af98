use crate::ClientError;
use crate::comm::BatchSource;
use arrow::array::{Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, SchemaRef};
use mosaico_core::types::Timestamp;
use mosaico_model::{Row, TIMESTAMP_COLUMN, row_values};

/// Reading state of a single topic download.
///
/// Keeps the current record batch, a row cursor over it and a one-row peek
/// buffer. The peek buffer is what lets the sequence-level merger inspect
/// the next timestamp of every topic without consuming anything.
pub struct TopicReadState {
    topic_name: String,
    ontology_tag: String,
    source: Option<Box<dyn BatchSource>>,

    timestamp_index: usize,

    current: Option<(RecordBatch, usize)>,
    peeked: Option<(RecordBatch, usize)>,
    peeked_timestamp: Timestamp,
}

impl std::fmt::Debug for TopicReadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicReadState")
            .field("topic_name", &self.topic_name)
            .field("ontology_tag", &self.ontology_tag)
            .field("timestamp_index", &self.timestamp_index)
            .field("peeked_timestamp", &self.peeked_timestamp)
            .finish_non_exhaustive()
    }
}

impl TopicReadState {
    /// Validates the stream schema and builds the state.
    ///
    /// A schema without the `timestamp_ns` column (or with the wrong type)
    /// fails eagerly: such a stream could never take part in a time-ordered
    /// merge.
    pub fn new(
        topic_name: impl Into<String>,
        ontology_tag: impl Into<String>,
        source: Box<dyn BatchSource>,
        schema: &SchemaRef,
    ) -> Result<Self, ClientError> {
        let topic_name = topic_name.into();

        let timestamp_index = schema.index_of(TIMESTAMP_COLUMN).map_err(|_| {
            ClientError::Schema(format!(
                "topic '{topic_name}' schema is missing the required '{TIMESTAMP_COLUMN}' column"
            ))
        })?;
        if schema.field(timestamp_index).data_type() != &DataType::Int64 {
            return Err(ClientError::Schema(format!(
                "topic '{topic_name}' column '{TIMESTAMP_COLUMN}' must be a 64-bit integer"
            )));
        }

        Ok(Self {
            topic_name,
            ontology_tag: ontology_tag.into(),
            source: Some(source),
            timestamp_index,
            current: None,
            peeked: None,
            peeked_timestamp: Timestamp::unbounded_pos(),
        })
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn ontology_tag(&self) -> &str {
        &self.ontology_tag
    }

    /// True when a row is currently buffered in the peek slot.
    pub fn has_peeked(&self) -> bool {
        self.peeked.is_some()
    }

    /// The timestamp of the peeked row, positive unbounded when the stream
    /// is exhausted or nothing is peeked yet.
    pub fn peeked_timestamp(&self) -> Timestamp {
        self.peeked_timestamp
    }

    /// Loads the next row into the peek buffer.
    ///
    /// Idempotent: with a row already peeked this is a no-op returning
    /// `true`. At end-of-stream the peek state is cleared and `false` is
    /// returned; end-of-stream is not an error. On a transport error the
    /// peek state is cleared and the error propagates.
    pub async fn peek_next_row(&mut self) -> Result<bool, ClientError> {
        if self.peeked.is_some() {
            return Ok(true);
        }

        let Some(source) = self.source.as_mut() else {
            self.clear_peek();
            return Ok(false);
        };

        loop {
            if let Some((batch, cursor)) = &mut self.current {
                if *cursor < batch.num_rows() {
                    let row = *cursor;
                    *cursor += 1;

                    let timestamps = batch
                        .column(self.timestamp_index)
                        .as_any()
                        .downcast_ref::<Int64Array>()
                        .ok_or_else(|| {
                            ClientError::Schema(format!(
                                "topic '{}' carries a malformed '{TIMESTAMP_COLUMN}' column",
                                self.topic_name
                            ))
                        })?;
                    if timestamps.is_null(row) {
                        self.clear_peek();
                        return Err(ClientError::Schema(format!(
                            "topic '{}' carries a null '{TIMESTAMP_COLUMN}' value",
                            self.topic_name
                        )));
                    }

                    self.peeked_timestamp = timestamps.value(row).into();
                    self.peeked = Some((batch.clone(), row));
                    return Ok(true);
                }
                self.current = None;
            }

            match source.next_batch().await {
                // Zero-row chunks are skipped, not an end-of-stream signal
                Ok(Some(batch)) if batch.num_rows() == 0 => continue,
                Ok(Some(batch)) => self.current = Some((batch, 0)),
                Ok(None) => {
                    self.clear_peek();
                    return Ok(false);
                }
                Err(e) => {
                    self.clear_peek();
                    return Err(e);
                }
            }
        }
    }

    /// Materializes the peeked row as a column-name to value map.
    pub fn peeked_row(&self) -> Result<Option<Row>, ClientError> {
        match &self.peeked {
            Some((batch, row)) => Ok(Some(row_values(batch, *row)?)),
            None => Ok(None),
        }
    }

    /// Consume-and-advance: drops the peeked row and peeks the next one.
    pub async fn advance(&mut self) -> Result<bool, ClientError> {
        self.peeked = None;
        self.peeked_timestamp = Timestamp::unbounded_pos();
        self.peek_next_row().await
    }

    /// Cancels the download and releases the handle. Safe to call more than
    /// once.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.cancel();
        }
        self.current = None;
        self.clear_peek();
    }

    fn clear_peek(&mut self) {
        self.peeked = None;
        self.peeked_timestamp = Timestamp::unbounded_pos();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockSource, TestImu, imu_batch, register_test_ontologies};
    use arrow::datatypes::{Field, Schema};
    use mosaico_core::types::Value;
    use mosaico_model::{Message, Ontology};
    use std::sync::Arc;

    fn state_over(batches: Vec<RecordBatch>) -> TopicReadState {
        register_test_ontologies();
        let schema = Message::combined_schema_of::<TestImu>().unwrap();
        TopicReadState::new("/imu", TestImu::TAG, Box::new(MockSource::new(batches)), &schema)
            .unwrap()
    }

    #[tokio::test]
    async fn missing_timestamp_column_fails_eagerly() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "value",
            DataType::Float64,
            false,
        )]));
        let err = TopicReadState::new("/imu", "imu", Box::new(MockSource::new(vec![])), &schema)
            .unwrap_err();
        assert!(matches!(err, ClientError::Schema(_)));
    }

    #[tokio::test]
    async fn peek_is_idempotent() {
        let mut state = state_over(vec![imu_batch(&[10, 20])]);

        assert!(state.peek_next_row().await.unwrap());
        assert_eq!(state.peeked_timestamp(), 10.into());

        // A second peek must not move the stream
        assert!(state.peek_next_row().await.unwrap());
        assert_eq!(state.peeked_timestamp(), 10.into());

        assert!(state.advance().await.unwrap());
        assert_eq!(state.peeked_timestamp(), 20.into());
    }

    #[tokio::test]
    async fn empty_chunks_are_skipped() {
        let mut state = state_over(vec![imu_batch(&[]), imu_batch(&[5]), imu_batch(&[])]);

        assert!(state.peek_next_row().await.unwrap());
        assert_eq!(state.peeked_timestamp(), 5.into());

        assert!(!state.advance().await.unwrap());
        assert!(state.peeked_timestamp().is_unbounded_pos());
    }

    #[tokio::test]
    async fn exhaustion_is_not_an_error() {
        let mut state = state_over(vec![imu_batch(&[1])]);

        assert!(state.peek_next_row().await.unwrap());
        assert!(!state.advance().await.unwrap());
        // Peeking an exhausted stream stays a clean no-row answer
        assert!(!state.peek_next_row().await.unwrap());
        assert!(state.peeked_timestamp().is_unbounded_pos());
    }

    #[tokio::test]
    async fn transport_errors_clear_the_peek_and_propagate() {
        register_test_ontologies();
        let schema = Message::combined_schema_of::<TestImu>().unwrap();
        let source = MockSource::new(vec![imu_batch(&[1])]).failing_after(1);
        let mut state = TopicReadState::new("/imu", TestImu::TAG, Box::new(source), &schema).unwrap();

        assert!(state.peek_next_row().await.unwrap());
        let err = state.advance().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(state.peeked_timestamp().is_unbounded_pos());
    }

    #[tokio::test]
    async fn rows_materialize_across_batches() {
        let mut state = state_over(vec![imu_batch(&[1, 2]), imu_batch(&[3])]);

        let mut seen = Vec::new();
        while state.peek_next_row().await.unwrap() {
            let row = state.peeked_row().unwrap().unwrap();
            seen.push(row.get("timestamp_ns").cloned().unwrap());
            state.advance().await.unwrap();
        }
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        state.close();
        state.close();
    }
}
