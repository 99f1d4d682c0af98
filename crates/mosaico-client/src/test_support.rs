//! Shared fixtures: sample ontologies registered once per process and
//! in-memory implementations of the streaming seams.
use crate::ClientError;
use crate::comm::{BatchSink, BatchSource};
use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Fields};
use futures::future::BoxFuture;
use mosaico_core::types::{Format, Value};
use mosaico_model::{
    Message, ModelError, Ontology, Row, batch_from_messages, register_ontology,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

/// Fixed-width inertial payload.
pub(crate) struct TestImu {
    pub accel: (f64, f64, f64),
}

impl Ontology for TestImu {
    const TAG: &'static str = "test_imu";
    const FORMAT: Format = Format::Default;

    fn payload_fields() -> Fields {
        Fields::from(vec![
            Field::new("ax", DataType::Float64, false),
            Field::new("ay", DataType::Float64, false),
            Field::new("az", DataType::Float64, false),
        ])
    }

    fn encode_payload(&self, out: &mut Row) {
        out.insert("ax".to_owned(), Value::Float(self.accel.0));
        out.insert("ay".to_owned(), Value::Float(self.accel.1));
        out.insert("az".to_owned(), Value::Float(self.accel.2));
    }

    fn decode_payload(row: &Row) -> Result<Self, ModelError> {
        let axis = |name: &str| {
            row.get(name)
                .and_then(Value::as_f64)
                .ok_or_else(|| ModelError::MissingField(name.to_owned()))
        };
        Ok(Self {
            accel: (axis("ax")?, axis("ay")?, axis("az")?),
        })
    }
}

/// Blob payload, image-like, for size-driven tests.
pub(crate) struct TestBlob {
    pub data: Vec<u8>,
}

impl Ontology for TestBlob {
    const TAG: &'static str = "test_blob";
    const FORMAT: Format = Format::Image;

    fn payload_fields() -> Fields {
        Fields::from(vec![Field::new("data", DataType::Binary, false)])
    }

    fn encode_payload(&self, out: &mut Row) {
        out.insert("data".to_owned(), Value::Bytes(self.data.clone()));
    }

    fn decode_payload(row: &Row) -> Result<Self, ModelError> {
        Ok(Self {
            data: row
                .get("data")
                .and_then(Value::as_bytes)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| ModelError::MissingField("data".to_owned()))?,
        })
    }
}

/// Registers the fixture ontologies exactly once for the test binary.
pub(crate) fn register_test_ontologies() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_ontology::<TestImu>().unwrap();
        register_ontology::<TestBlob>().unwrap();
    });
}

pub(crate) fn imu_message(timestamp_ns: i64) -> Message {
    Message::new(
        timestamp_ns,
        TestImu {
            accel: (0.1, 0.2, 0.3),
        },
    )
    .unwrap()
}

/// One record batch of [`TestImu`] rows with the given timestamps.
pub(crate) fn imu_batch(timestamps: &[i64]) -> RecordBatch {
    register_test_ontologies();
    let schema = Message::combined_schema_of::<TestImu>().unwrap();
    let messages: Vec<Message> = timestamps.iter().map(|ts| imu_message(*ts)).collect();
    batch_from_messages(&schema, &messages).unwrap()
}

/// In-memory sink recording every batch plus the observed write
/// concurrency.
pub(crate) struct MockSink {
    batches: Mutex<Vec<RecordBatch>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    finished: AtomicBool,
    fail_writes: AtomicBool,
    write_delay: Option<Duration>,
}

impl MockSink {
    pub(crate) fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_delay: None,
        }
    }

    pub(crate) fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub(crate) fn failing(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn batches(&self) -> Vec<RecordBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl BatchSink for MockSink {
    fn write_batch(&self, batch: RecordBatch) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.write_delay {
                tokio::time::sleep(delay).await;
            }

            let result = if self.fail_writes.load(Ordering::SeqCst) {
                Err(ClientError::Transport("mock sink write failure".to_owned()))
            } else {
                self.batches.lock().unwrap().push(batch);
                Ok(())
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn finish(&self) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// In-memory source yielding a fixed batch list, optionally failing after
/// the first `fail_after` chunks.
pub(crate) struct MockSource {
    batches: VecDeque<RecordBatch>,
    served: usize,
    fail_after: Option<usize>,
    cancelled: bool,
}

impl MockSource {
    pub(crate) fn new(batches: Vec<RecordBatch>) -> Self {
        Self {
            batches: batches.into(),
            served: 0,
            fail_after: None,
            cancelled: false,
        }
    }

    pub(crate) fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }
}

impl BatchSource for MockSource {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<RecordBatch>, ClientError>> {
        Box::pin(async move {
            if self.cancelled {
                return Ok(None);
            }
            if let Some(fail_after) = self.fail_after
                && self.served >= fail_after
            {
                return Err(ClientError::Transport("mock source read failure".to_owned()));
            }

            self.served += 1;
            Ok(self.batches.pop_front())
        })
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.batches.clear();
    }
}
