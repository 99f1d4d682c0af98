use crate::ClientError;
use crate::comm::{BatchSink, MAX_FLIGHT_BATCH_BYTES, WorkerLane};
use arrow::datatypes::SchemaRef;
use log::{error, info};
use mosaico_core::types::Format;
use mosaico_model::{Message, batch_from_messages, encoded_batch_size};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, oneshot};

/// How many flushed batches may be in flight per topic before `push`
/// blocks the producer. This is the sole back-pressure mechanism.
const MAX_PENDING_BATCHES: usize = 3;

/// Buffering strategy of a topic: by accumulated encoded size or by record
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadMode {
    Bytes,
    Count,
}

/// Static assignment of serialization formats to their upload strategy.
/// Count mode stays reserved for formats that explicitly request it.
fn upload_mode(format: Format) -> UploadMode {
    match format {
        Format::Default | Format::Ragged | Format::Image => UploadMode::Bytes,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStage {
    Open,
    Closing,
    Closed,
}

type WriteResult = Result<(), String>;

/// Buffer, batching and async dispatch state of a single topic upload.
///
/// Messages accumulate in a row buffer. When the configured threshold is
/// crossed the buffer is snapshotted and handed to the topic's worker lane,
/// which serializes it into a record batch and writes it to the sink. A
/// bounded semaphore caps the number of in-flight flushes, blocking the
/// producer when the network falls behind.
pub struct TopicWriteState {
    topic_name: String,
    ontology_tag: String,
    schema: SchemaRef,
    sink: Arc<dyn BatchSink>,
    lane: Option<Arc<WorkerLane>>,
    mode: UploadMode,
    max_batch_size_bytes: usize,
    max_batch_size_records: usize,

    buffer: Vec<Message>,
    buffered_bytes: usize,

    pending: Arc<Mutex<Vec<oneshot::Receiver<WriteResult>>>>,
    flush_gate: Arc<Semaphore>,

    pushed_records: u64,
    written_records: u64,
    stage: WriteStage,
}

impl std::fmt::Debug for TopicWriteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicWriteState")
            .field("topic_name", &self.topic_name)
            .field("ontology_tag", &self.ontology_tag)
            .field("mode", &self.mode)
            .field("max_batch_size_bytes", &self.max_batch_size_bytes)
            .field("max_batch_size_records", &self.max_batch_size_records)
            .field("buffered_bytes", &self.buffered_bytes)
            .field("pushed_records", &self.pushed_records)
            .field("written_records", &self.written_records)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl TopicWriteState {
    pub fn new(
        topic_name: impl Into<String>,
        ontology_tag: impl Into<String>,
        format: Format,
        schema: SchemaRef,
        sink: Arc<dyn BatchSink>,
        lane: Option<Arc<WorkerLane>>,
        max_batch_size_bytes: usize,
        max_batch_size_records: usize,
    ) -> Result<Self, ClientError> {
        if max_batch_size_bytes == 0 || max_batch_size_records == 0 {
            return Err(ClientError::State(
                "'max_batch_size_bytes' and 'max_batch_size_records' must both be set".to_owned(),
            ));
        }
        // The flush threshold needs headroom below the transport ceiling,
        // otherwise a batch can pass the check and still be unsendable
        if max_batch_size_bytes as f64 >= MAX_FLIGHT_BATCH_BYTES as f64 * 0.9 {
            return Err(ClientError::State(format!(
                "'max_batch_size_bytes' must be strictly less than 90% of the {MAX_FLIGHT_BATCH_BYTES} bytes transport limit"
            )));
        }

        Ok(Self {
            topic_name: topic_name.into(),
            ontology_tag: ontology_tag.into(),
            schema,
            sink,
            lane,
            mode: upload_mode(format),
            max_batch_size_bytes,
            max_batch_size_records,
            buffer: Vec::new(),
            buffered_bytes: 0,
            pending: Arc::new(Mutex::new(Vec::new())),
            flush_gate: Arc::new(Semaphore::new(MAX_PENDING_BATCHES)),
            pushed_records: 0,
            written_records: 0,
            stage: WriteStage::Open,
        })
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn ontology_tag(&self) -> &str {
        &self.ontology_tag
    }

    pub fn pushed_records(&self) -> u64 {
        self.pushed_records
    }

    pub fn written_records(&self) -> u64 {
        self.written_records
    }

    pub fn finalized(&self) -> bool {
        self.stage == WriteStage::Closed
    }

    /// Adds a record to the buffer, flushing when the topic's threshold is
    /// crossed. May block on the flush gate when the maximum number of
    /// batches is already in flight.
    pub async fn push(&mut self, message: Message) -> Result<(), ClientError> {
        if self.stage != WriteStage::Open {
            return Err(ClientError::State(format!(
                "push on topic '{}' after finalization",
                self.topic_name
            )));
        }
        if message.ontology_tag() != self.ontology_tag {
            return Err(ClientError::Schema(format!(
                "topic '{}' carries ontology '{}', got a '{}' message",
                self.topic_name,
                self.ontology_tag,
                message.ontology_tag()
            )));
        }

        match self.mode {
            UploadMode::Bytes => self.push_by_bytes(message).await?,
            UploadMode::Count => self.push_by_count(message).await?,
        }

        self.pushed_records += 1;
        Ok(())
    }

    /// Byte-mode buffering: the new record is encoded alone to learn its
    /// exact wire size before committing it to the buffer.
    async fn push_by_bytes(&mut self, message: Message) -> Result<(), ClientError> {
        let single = batch_from_messages(&self.schema, std::slice::from_ref(&message))?;
        let single_size = encoded_batch_size(&single)?;

        // A record beyond the transport ceiling can never be shipped from
        // here, it would need chunking upstream of the SDK
        if single_size > MAX_FLIGHT_BATCH_BYTES {
            error!(
                "single record size ({single_size} bytes) exceeds the transport limit ({MAX_FLIGHT_BATCH_BYTES} bytes) for topic '{}', record will be skipped",
                self.topic_name
            );
            return Ok(());
        }

        let projected = self.buffered_bytes + single_size;
        if projected > self.max_batch_size_bytes {
            if !self.buffer.is_empty() {
                self.flush_current().await?;
            }

            // A single record above the flush threshold travels as a batch
            // of one
            self.buffer = vec![message];
            self.buffered_bytes = single_size;
        } else {
            self.buffer.push(message);
            self.buffered_bytes = single_size + self.buffered_bytes;
        }

        Ok(())
    }

    /// Count-mode buffering: flush on the N-th record.
    async fn push_by_count(&mut self, message: Message) -> Result<(), ClientError> {
        self.buffer.push(message);
        if self.buffer.len() >= self.max_batch_size_records {
            self.flush_current().await?;
        }
        Ok(())
    }

    /// Snapshots the buffer and dispatches its serialization and write.
    ///
    /// Acquiring the flush gate blocks the producer while
    /// `MAX_PENDING_BATCHES` flushes are in flight.
    async fn flush_current(&mut self) -> Result<(), ClientError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.reap_completed();

        let records = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;
        self.written_records += records.len() as u64;

        let permit = self
            .flush_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::State("flush gate closed".to_owned()))?;

        let (done_tx, done_rx) = oneshot::channel::<WriteResult>();
        let schema = self.schema.clone();
        let sink = self.sink.clone();
        let topic_name = self.topic_name.clone();

        let task = async move {
            let result = match batch_from_messages(&schema, &records) {
                Ok(batch) => sink.write_batch(batch).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            if let Err(err) = &result {
                error!("async write failed for topic '{topic_name}': {err}");
            }

            let _ = done_tx.send(result);
            drop(permit);
        };

        match &self.lane {
            Some(lane) => lane.submit(task)?,
            // Without a lane the flush runs on the caller, the gate still
            // brackets the write
            None => task.await,
        }

        self.pending
            .lock()
            .expect("pending writes lock poisoned")
            .push(done_rx);

        Ok(())
    }

    /// Drops tracking entries of flushes that already completed, keeping
    /// the pending list from growing over a long upload.
    fn reap_completed(&self) {
        let mut pending = self.pending.lock().expect("pending writes lock poisoned");
        pending.retain_mut(|done| match done.try_recv() {
            Ok(_) => false,
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => false,
        });
    }

    /// Blocks until every in-flight flush resolves, logging the failures.
    async fn wait_pending(&mut self) {
        let receivers: Vec<oneshot::Receiver<WriteResult>> = {
            let mut pending = self.pending.lock().expect("pending writes lock poisoned");
            pending.drain(..).collect()
        };

        if !receivers.is_empty() {
            info!(
                "waiting for pending writes termination, for topic {}...",
                self.topic_name
            );
        }

        for done in receivers {
            match done.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("async write error: {err}"),
                // Worker dropped without reporting, already logged there
                Err(_) => {}
            }
        }
    }

    /// Finalizes the topic stream.
    ///
    /// Without an error the residual buffer is flushed and every in-flight
    /// write awaited before the end-of-stream signal. The close path is
    /// idempotent.
    pub async fn close(&mut self, with_error: bool) -> Result<(), ClientError> {
        if self.stage == WriteStage::Closed {
            return Ok(());
        }
        self.stage = WriteStage::Closing;

        let mut drain_result = Ok(());
        if !with_error {
            drain_result = self.flush_current().await;
            self.wait_pending().await;
        }

        let finish_result = self.sink.finish().await;
        self.stage = WriteStage::Closed;

        info!(
            "topic {} finished. pushed: {}, written: {}",
            self.topic_name, self.pushed_records, self.written_records
        );

        drain_result.and(finish_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockSink, TestBlob, TestImu, imu_message, register_test_ontologies};
    use mosaico_model::Ontology;

    fn byte_state(sink: Arc<MockSink>, max_bytes: usize) -> TopicWriteState {
        register_test_ontologies();
        TopicWriteState::new(
            "/imu",
            TestImu::TAG,
            Format::Default,
            Message::combined_schema_of::<TestImu>().unwrap(),
            sink,
            None,
            max_bytes,
            5_000,
        )
        .unwrap()
    }

    fn count_state(sink: Arc<MockSink>, max_records: usize) -> TopicWriteState {
        register_test_ontologies();
        let mut state = TopicWriteState::new(
            "/imu",
            TestImu::TAG,
            Format::Default,
            Message::combined_schema_of::<TestImu>().unwrap(),
            sink,
            None,
            DEFAULT_TEST_BYTES,
            max_records,
        )
        .unwrap();
        state.mode = UploadMode::Count;
        state
    }

    const DEFAULT_TEST_BYTES: usize = 1024 * 1024;

    #[tokio::test]
    async fn threshold_validation() {
        register_test_ontologies();
        let schema = Message::combined_schema_of::<TestImu>().unwrap();

        // The byte threshold must stay under 90% of the transport ceiling
        let err = TopicWriteState::new(
            "/imu",
            TestImu::TAG,
            Format::Default,
            schema.clone(),
            Arc::new(MockSink::new()),
            None,
            MAX_FLIGHT_BATCH_BYTES,
            5_000,
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::State(_)));

        // Both thresholds must be set
        let err = TopicWriteState::new(
            "/imu",
            TestImu::TAG,
            Format::Default,
            schema,
            Arc::new(MockSink::new()),
            None,
            DEFAULT_TEST_BYTES,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::State(_)));
    }

    #[tokio::test]
    async fn byte_mode_flushes_on_threshold() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());

        // Learn the exact single-record encoded size, then set a threshold
        // holding three of them: accumulation is by single-record sizes
        let schema = Message::combined_schema_of::<TestImu>().unwrap();
        let one = encoded_batch_size(
            &batch_from_messages(&schema, &[imu_message(0)]).unwrap(),
        )
        .unwrap();
        let threshold = 3 * one + one / 2;

        let mut state = byte_state(sink.clone(), threshold);
        for i in 0..10 {
            state.push(imu_message(i)).await.unwrap();
        }
        state.close(false).await.unwrap();

        let batches = sink.batches();
        // 3 + 3 + 3 + the residual record
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].num_rows(), 3);
        // No submitted batch exceeds the configured threshold
        for batch in &batches {
            assert!(encoded_batch_size(batch).unwrap() <= threshold);
        }
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 10);
    }

    #[tokio::test]
    async fn batch_exactly_at_threshold_does_not_flush() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());

        let schema = Message::combined_schema_of::<TestImu>().unwrap();
        let one = encoded_batch_size(
            &batch_from_messages(&schema, &[imu_message(0)]).unwrap(),
        )
        .unwrap();
        let two = 2 * one;

        // Threshold equal to the projected size of two records: pushing the
        // second record lands exactly on the threshold and must not flush
        let mut state = byte_state(sink.clone(), two);
        state.push(imu_message(0)).await.unwrap();
        state.push(imu_message(1)).await.unwrap();
        assert!(sink.batches().is_empty());

        state.close(false).await.unwrap();
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn oversized_record_is_dropped_not_fatal() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());
        let mut state = TopicWriteState::new(
            "/blob",
            TestBlob::TAG,
            Format::Image,
            Message::combined_schema_of::<TestBlob>().unwrap(),
            sink.clone(),
            None,
            DEFAULT_TEST_BYTES,
            5_000,
        )
        .unwrap();

        let huge = Message::new(
            1,
            TestBlob {
                data: vec![0xAA; MAX_FLIGHT_BATCH_BYTES + 1],
            },
        )
        .unwrap();
        state.push(huge).await.unwrap();

        let small = Message::new(
            2,
            TestBlob {
                data: vec![0xBB; 128],
            },
        )
        .unwrap();
        state.push(small).await.unwrap();

        state.close(false).await.unwrap();

        // Only the small record survived, the topic kept going
        let rows: usize = sink.batches().iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 1);
        assert_eq!(state.pushed_records(), 2);
    }

    #[tokio::test]
    async fn count_mode_flushes_on_nth_push() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());
        let mut state = count_state(sink.clone(), 3);

        state.push(imu_message(0)).await.unwrap();
        state.push(imu_message(1)).await.unwrap();
        assert!(sink.batches().is_empty());

        // The N-th push fires the flush
        state.push(imu_message(2)).await.unwrap();
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.batches()[0].num_rows(), 3);

        state.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn at_most_three_writes_in_flight() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new().with_write_delay(std::time::Duration::from_millis(20)));

        let mut pool = crate::comm::WorkerLanePool::new(1).unwrap();
        let lane = pool.next().unwrap();

        let mut state = count_state(sink.clone(), 1);
        state.lane = Some(lane);

        for i in 0..12 {
            state.push(imu_message(i)).await.unwrap();
        }
        state.close(false).await.unwrap();
        pool.close().await;

        assert_eq!(sink.batches().len(), 12);
        assert!(sink.max_in_flight() <= MAX_PENDING_BATCHES);
    }

    #[tokio::test]
    async fn pushed_equals_written_after_finalize() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());

        let mut pool = crate::comm::WorkerLanePool::new(2).unwrap();
        let mut state = count_state(sink.clone(), 4);
        state.lane = Some(pool.next().unwrap());

        for i in 0..10 {
            state.push(imu_message(i)).await.unwrap();
        }
        state.close(false).await.unwrap();
        pool.close().await;

        assert_eq!(state.pushed_records(), 10);
        assert_eq!(state.written_records(), 10);
        let rows: usize = sink.batches().iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 10);
        assert!(sink.finished());
    }

    #[tokio::test]
    async fn error_close_skips_the_residual_buffer() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());
        let mut state = count_state(sink.clone(), 100);

        state.push(imu_message(0)).await.unwrap();
        state.close(true).await.unwrap();

        assert!(sink.batches().is_empty());
        assert!(sink.finished());
    }

    #[tokio::test]
    async fn push_after_close_is_a_state_error() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());
        let mut state = count_state(sink.clone(), 10);

        state.close(false).await.unwrap();
        let err = state.push(imu_message(0)).await.unwrap_err();
        assert!(matches!(err, ClientError::State(_)));

        // Close is idempotent
        state.close(false).await.unwrap();
        assert!(state.finalized());
    }

    #[tokio::test]
    async fn wrong_ontology_is_a_schema_error() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new());
        let mut state = count_state(sink, 10);

        let blob = Message::new(1, TestBlob { data: vec![1] }).unwrap();
        let err = state.push(blob).await.unwrap_err();
        assert!(matches!(err, ClientError::Schema(_)));
    }

    #[tokio::test]
    async fn failed_writes_surface_at_close_without_raising() {
        register_test_ontologies();
        let sink = Arc::new(MockSink::new().failing());
        let mut state = count_state(sink.clone(), 1);

        state.push(imu_message(0)).await.unwrap();
        // The sink failure was recorded on the pending write, close logs it
        // and still succeeds
        state.close(false).await.unwrap();
        assert!(state.finalized());
    }
}
