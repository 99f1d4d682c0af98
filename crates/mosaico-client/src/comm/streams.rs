use crate::ClientError;
use crate::comm::Connection;
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{FlightDescriptor, Ticket};
use futures::TryStreamExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Write side of one topic upload stream.
///
/// The trait is the seam between the buffering state machine and the
/// transport, tests drive the state machine against an in-memory sink.
pub trait BatchSink: Send + Sync {
    /// Writes one record batch to the stream, in submission order.
    fn write_batch(&self, batch: RecordBatch) -> BoxFuture<'_, Result<(), ClientError>>;

    /// Signals end-of-stream and closes the handle. Idempotent.
    fn finish(&self) -> BoxFuture<'_, Result<(), ClientError>>;
}

/// Read side of one topic download stream.
pub trait BatchSource: Send {
    /// The next record batch, or `None` at end-of-stream.
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<RecordBatch>, ClientError>>;

    /// Cancels the stream. Further polls report end-of-stream.
    fn cancel(&mut self);
}

// ////////////////////////////////////////////////////////////////////////////
// DO PUT
// ////////////////////////////////////////////////////////////////////////////

type PutDriver = JoinHandle<Result<(), FlightError>>;

/// A live DoPut stream: batches pushed into the channel are IPC-encoded and
/// shipped as the transport drains them, while a background task consumes
/// the server acknowledgements.
pub struct FlightPutStream {
    sender: Mutex<Option<mpsc::Sender<Result<RecordBatch, FlightError>>>>,
    driver: Mutex<Option<PutDriver>>,
}

impl FlightPutStream {
    /// Opens the upload stream with the given descriptor and schema.
    pub async fn open(
        conn: &Connection,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
    ) -> Result<Self, ClientError> {
        let (sender, receiver) = mpsc::channel::<Result<RecordBatch, FlightError>>(8);

        let batches = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });

        let request = FlightDataEncoderBuilder::new()
            .with_flight_descriptor(Some(descriptor))
            .with_schema(schema)
            .build(batches);

        let mut client = conn.flight();
        let response = client.do_put(request).await?;

        // Drain the acknowledgement stream so the transport keeps moving
        let driver: PutDriver = tokio::spawn(async move {
            let mut response = std::pin::pin!(response);
            while response.try_next().await?.is_some() {}
            Ok(())
        });

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            driver: Mutex::new(Some(driver)),
        })
    }
}

impl BatchSink for FlightPutStream {
    fn write_batch(&self, batch: RecordBatch) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            let sender = self.sender.lock().await;
            let sender = sender
                .as_ref()
                .ok_or_else(|| ClientError::State("write on a finished put stream".to_owned()))?;

            sender
                .send(Ok(batch))
                .await
                .map_err(|_| ClientError::Transport("put stream closed by the transport".to_owned()))
        })
    }

    fn finish(&self) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            // Dropping the sender is the end-of-stream signal
            self.sender.lock().await.take();

            let driver = self.driver.lock().await.take();
            if let Some(driver) = driver {
                match driver.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(e) => return Err(ClientError::Transport(e.to_string())),
                }
            }
            Ok(())
        })
    }
}

// ////////////////////////////////////////////////////////////////////////////
// DO GET
// ////////////////////////////////////////////////////////////////////////////

/// A live DoGet stream plus the one batch that had to be polled to surface
/// the schema message.
pub struct FlightGetStream {
    stream: Option<FlightRecordBatchStream>,
    pending: Option<RecordBatch>,
}

impl FlightGetStream {
    /// Opens the download stream for `ticket` and resolves its annotated
    /// schema.
    ///
    /// The schema message precedes the data on the wire, so the stream is
    /// polled once up front, the batch possibly received alongside it is
    /// buffered and yielded first.
    pub async fn open(
        conn: &Connection,
        ticket: Ticket,
    ) -> Result<(Self, SchemaRef), ClientError> {
        let mut client = conn.flight();
        let mut stream = client.do_get(ticket).await?;

        let pending = stream.try_next().await?;
        let schema = stream.schema().cloned().ok_or_else(|| {
            ClientError::Schema("the stream carries no schema message".to_owned())
        })?;

        Ok((
            Self {
                stream: Some(stream),
                pending,
            },
            schema,
        ))
    }
}

impl BatchSource for FlightGetStream {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<RecordBatch>, ClientError>> {
        Box::pin(async move {
            if let Some(batch) = self.pending.take() {
                return Ok(Some(batch));
            }
            match self.stream.as_mut() {
                Some(stream) => Ok(stream.try_next().await?),
                None => Ok(None),
            }
        })
    }

    fn cancel(&mut self) {
        // Dropping the decoder tears the gRPC stream down
        self.stream = None;
        self.pending = None;
    }
}
