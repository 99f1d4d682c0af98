use crate::comm::{Connection, FlightPutStream, WorkerLane, do_action, do_action_unit};
use crate::{ClientError, OnErrorPolicy, TopicWriteState, WriterConfig};
use arrow_flight::FlightDescriptor;
use log::{error, info, warn};
use mosaico_core::types::{UserMetadata, pack_topic_resource_name};
use mosaico_marshal::{FlightAction, KeyResponse, do_put_descriptor_cmd};
use mosaico_model::{Header, Message, Ontology, OntologyData, ontology_descriptor};
use std::sync::Arc;

/// The data stream of a single topic.
///
/// Records accumulate in the internal write state and are shipped through
/// the Flight DoPut stream opened at creation. `finalize` is the single exit
/// path, invoked by the owning sequence writer.
pub struct TopicWriter {
    sequence_name: String,
    name: String,
    conn: Connection,
    state: TopicWriteState,
    config: WriterConfig,
}

impl TopicWriter {
    /// Registers the topic on the server and opens its upload stream.
    ///
    /// The ontology type must be registered beforehand. The server returns
    /// the topic ownership key, which becomes part of the DoPut descriptor.
    pub(crate) async fn create<T: Ontology>(
        sequence_name: &str,
        topic_name: &str,
        sequence_key: &str,
        conn: Connection,
        lane: Option<Arc<WorkerLane>>,
        metadata: UserMetadata,
        config: &WriterConfig,
    ) -> Result<Self, ClientError> {
        let descriptor = ontology_descriptor(T::TAG)
            .ok_or_else(|| ClientError::State(format!("ontology '{}' is not registered", T::TAG)))?;

        let resource_name = pack_topic_resource_name(sequence_name, topic_name);

        // Register the topic under its parent sequence
        let payload = serde_json::json!({
            "sequence_key": sequence_key,
            "name": resource_name,
            "serialization_format": descriptor.format().to_string(),
            "ontology_tag": T::TAG,
            "user_metadata": metadata,
        });
        let response: Option<KeyResponse> = do_action(&conn, FlightAction::TopicCreate, payload)
            .await
            .map_err(|e| ClientError::action_failed("topic_create", &resource_name, e))?;
        let topic_key = response
            .ok_or(ClientError::NoResponse("topic_create"))?
            .key;

        // Open the upload stream, routed by the packed name and the key
        let schema = Message::combined_schema_of::<T>()?;
        let cmd = do_put_descriptor_cmd(&resource_name, &topic_key)?;
        let sink = FlightPutStream::open(&conn, FlightDescriptor::new_cmd(cmd), schema.clone())
            .await
            .map_err(|e| {
                ClientError::topic_operation(topic_name, "failed to open the upload stream", e)
            })?;

        let state = TopicWriteState::new(
            topic_name,
            T::TAG,
            descriptor.format(),
            schema,
            Arc::new(sink),
            lane,
            config.max_batch_size_bytes,
            config.max_batch_size_records,
        )?;

        Ok(Self {
            sequence_name: sequence_name.to_owned(),
            name: topic_name.to_owned(),
            conn,
            state,
            config: *config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pushed_records(&self) -> u64 {
        self.state.pushed_records()
    }

    pub fn written_records(&self) -> u64 {
        self.state.written_records()
    }

    /// Adds a record to the write buffer, flushing to the server when the
    /// topic's batching threshold is crossed.
    ///
    /// On failure the configured error policy is applied (Report notifies
    /// the server), local resources are released and the wrapped error is
    /// returned.
    pub async fn push(&mut self, message: Message) -> Result<(), ClientError> {
        match self.state.push(message).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.handle_error(e, "error during push").await),
        }
    }

    /// Envelope-building variant of [`TopicWriter::push`].
    pub async fn push_parts(
        &mut self,
        timestamp_ns: i64,
        data: impl OntologyData + 'static,
        header: Option<Header>,
    ) -> Result<(), ClientError> {
        let message = match header {
            Some(header) => Message::with_header(timestamp_ns, data, header),
            None => Message::new(timestamp_ns, data),
        }?;
        self.push(message).await
    }

    /// True once the upload stream has been closed.
    pub fn finalized(&self) -> bool {
        self.state.finalized()
    }

    /// Flushes pending data (unless closing on an error) and closes the
    /// upload stream. Idempotent.
    pub async fn finalize(&mut self, with_error: bool) -> Result<(), ClientError> {
        self.state.close(with_error).await?;
        info!(
            "topic writer '{}' finalized{} successfully",
            self.name,
            if with_error { " with error" } else { "" }
        );
        Ok(())
    }

    async fn handle_error(&mut self, err: ClientError, context: &'static str) -> ClientError {
        if self.config.on_error == OnErrorPolicy::Report
            && let Err(report_err) = self.error_report(&err.to_string()).await
        {
            error!("failed to report error: {report_err}");
        }

        // Always release the local resources
        if let Err(close_err) = self.state.close(true).await {
            error!(
                "failed to close topic '{}' after an error: {close_err}",
                self.name
            );
        }

        ClientError::topic_operation(&self.name, context, err)
    }

    /// Sends an error notification for this topic.
    async fn error_report(&self, msg: &str) -> Result<(), ClientError> {
        let resource_name = pack_topic_resource_name(&self.sequence_name, &self.name);
        do_action_unit(
            &self.conn,
            FlightAction::TopicNotifyCreate,
            serde_json::json!({
                "name": resource_name,
                "notify_type": "error",
                "msg": msg,
            }),
        )
        .await
        .map_err(|e| ClientError::action_failed("topic_notify_create", resource_name, e))?;

        info!("topic writer '{}' reported error", self.name);
        Ok(())
    }
}

impl Drop for TopicWriter {
    fn drop(&mut self) {
        if !self.state.finalized() {
            warn!(
                "topic writer '{}' dropped without finalize(), resources may not have been released properly",
                self.name
            );
        }
    }
}
