use crate::comm::{Connection, ConnectionPool, WorkerLanePool, do_action, do_action_unit};
use crate::{ClientError, OnErrorPolicy, SequenceStatus, TopicWriter, WriterConfig};
use log::{debug, error, info, warn};
use mosaico_core::types::{UserMetadata, validate_sequence_name};
use mosaico_marshal::{FlightAction, KeyResponse};
use mosaico_model::Ontology;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transactional coordinator of one sequence upload.
///
/// Registers the sequence, hands every new topic a connection and a worker lane
/// pulled round-robin from the client pools, and drives the exit paths:
/// [`SequenceWriter::finalize`] on success, [`SequenceWriter::fail`] when
/// the caller abandons the scope with an error.
pub struct SequenceWriter {
    name: String,
    control: Connection,
    connection_pool: Option<Arc<ConnectionPool>>,
    lane_pool: Option<Arc<WorkerLanePool>>,
    config: WriterConfig,
    key: String,
    status: SequenceStatus,
    topics: BTreeMap<String, TopicWriter>,
}

impl SequenceWriter {
    /// Registers the sequence on the server and enters the Pending state.
    ///
    /// The returned key is the proof-of-ownership required by every
    /// subsequent topic creation and by finalize/abort.
    pub(crate) async fn create(
        sequence_name: &str,
        metadata: UserMetadata,
        control: Connection,
        connection_pool: Option<Arc<ConnectionPool>>,
        lane_pool: Option<Arc<WorkerLanePool>>,
        config: WriterConfig,
    ) -> Result<Self, ClientError> {
        validate_sequence_name(sequence_name)?;

        let payload = serde_json::json!({
            "name": sequence_name,
            "user_metadata": metadata,
        });
        let response: Option<KeyResponse> =
            do_action(&control, FlightAction::SequenceCreate, payload)
                .await
                .map_err(|e| ClientError::action_failed("sequence_create", sequence_name, e))?;
        let key = response
            .ok_or(ClientError::NoResponse("sequence_create"))?
            .key;

        Ok(Self {
            name: sequence_name.to_owned(),
            control,
            connection_pool,
            lane_pool,
            config,
            key,
            status: SequenceStatus::Pending,
            topics: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SequenceStatus {
        self.status
    }

    /// Creates a new topic within the sequence, assigning it a dedicated
    /// connection and worker lane from the pools when available.
    ///
    /// Returns `None` when the topic already exists locally or any step of
    /// the creation fails; the sequence keeps going either way.
    pub async fn topic_create<T: Ontology>(
        &mut self,
        topic_name: &str,
        metadata: UserMetadata,
    ) -> Option<&mut TopicWriter> {
        if self.topics.contains_key(topic_name) {
            error!("topic '{topic_name}' already exists in this sequence");
            return None;
        }

        debug!(
            "requesting new topic '{topic_name}' for sequence '{}'",
            self.name
        );

        // Round-robin assignment from the pools, falling back to the
        // control connection and synchronous writes
        let conn = match &self.connection_pool {
            Some(pool) => match pool.next() {
                Ok(conn) => conn,
                Err(e) => {
                    error!("connection pool exhausted for topic '{topic_name}': {e}");
                    return None;
                }
            },
            None => self.control.clone(),
        };
        let lane = self.lane_pool.as_ref().and_then(|pool| pool.next().ok());

        match TopicWriter::create::<T>(
            &self.name,
            topic_name,
            &self.key,
            conn,
            lane,
            metadata,
            &self.config,
        )
        .await
        {
            Ok(writer) => {
                self.topics.insert(topic_name.to_owned(), writer);
                self.topics.get_mut(topic_name)
            }
            Err(e) => {
                error!(
                    "failed to initialize topic writer for sequence '{}', topic '{topic_name}': {e}",
                    self.name
                );
                None
            }
        }
    }

    /// Checks if a local topic writer exists for the name.
    pub fn topic_exists(&self, topic_name: &str) -> bool {
        self.topics.contains_key(topic_name)
    }

    /// Names of the topics created so far.
    pub fn topic_names(&self) -> Vec<&str> {
        self.topics.keys().map(String::as_str).collect()
    }

    /// Retrieves a topic writer, if it exists.
    pub fn topic_mut(&mut self, topic_name: &str) -> Option<&mut TopicWriter> {
        self.topics.get_mut(topic_name)
    }

    /// Normal exit: drains and closes every child topic, then finalizes the
    /// sequence on the server, making its data immutable.
    pub async fn finalize(mut self) -> Result<(), ClientError> {
        self.close_topics(false).await?;

        match do_action_unit(
            &self.control,
            FlightAction::SequenceFinalize,
            serde_json::json!({ "name": self.name, "key": self.key }),
        )
        .await
        {
            Ok(()) => {
                self.status = SequenceStatus::Finalized;
                info!("sequence '{}' finalized successfully", self.name);
                Ok(())
            }
            Err(e) => {
                self.status = SequenceStatus::Error;
                Err(ClientError::action_failed(
                    "sequence_finalize",
                    &self.name,
                    e,
                ))
            }
        }
    }

    /// Error exit: closes every child topic without draining, then applies
    /// the configured policy. Delete aborts the sequence server-side,
    /// Report notifies the error and keeps the partial data.
    pub async fn fail(mut self, msg: &str) -> Result<(), ClientError> {
        error!(
            "failure in sequence writer '{}' scope :: {msg}",
            self.name
        );

        let close_result = self.close_topics(true).await;
        let policy_result = match self.config.on_error {
            OnErrorPolicy::Delete => self.abort().await,
            OnErrorPolicy::Report => self.error_report(msg).await,
        };

        // Last thing to do: the Drop warning keys off a Pending status
        self.status = SequenceStatus::Error;

        close_result.and(policy_result)
    }

    async fn abort(&self) -> Result<(), ClientError> {
        do_action_unit(
            &self.control,
            FlightAction::SequenceAbort,
            serde_json::json!({ "name": self.name, "key": self.key }),
        )
        .await
        .map_err(|e| ClientError::action_failed("sequence_abort", &self.name, e))?;

        info!("sequence '{}' aborted successfully", self.name);
        Ok(())
    }

    async fn error_report(&self, msg: &str) -> Result<(), ClientError> {
        do_action_unit(
            &self.control,
            FlightAction::SequenceNotifyCreate,
            serde_json::json!({
                "name": self.name,
                "notify_type": "error",
                "msg": msg,
            }),
        )
        .await
        .map_err(|e| ClientError::action_failed("sequence_notify_create", &self.name, e))?;

        info!("sequence '{}' reported error", self.name);
        Ok(())
    }

    /// Finalizes every child topic, continuing through individual failures
    /// and surfacing them as one aggregate error afterwards.
    async fn close_topics(&mut self, with_error: bool) -> Result<(), ClientError> {
        info!(
            "freeing topic writers{} for sequence '{}'",
            if with_error { " with error" } else { "" },
            self.name
        );

        let mut errors: Vec<ClientError> = Vec::new();
        for (topic_name, writer) in self.topics.iter_mut() {
            if let Err(e) = writer.finalize(with_error).await {
                error!("failed to finalize topic '{topic_name}': {e}");
                errors.push(e);
            }
        }

        let failed = errors.len();
        match errors.into_iter().next() {
            Some(first) => Err(ClientError::TopicFinalize {
                failed,
                first: Box::new(first),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for SequenceWriter {
    fn drop(&mut self) {
        if self.status == SequenceStatus::Pending {
            warn!(
                "sequence writer '{}' dropped without finalize(), resources may not have been released properly",
                self.name
            );
        }
    }
}
