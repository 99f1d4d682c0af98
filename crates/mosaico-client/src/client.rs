use crate::comm::{Connection, ConnectionPool, WorkerLanePool, do_action, do_action_unit};
use crate::{ClientError, SequenceHandler, SequenceWriter, TopicHandler, WriterConfig};
use log::{error, info, warn};
use mosaico_core::types::{UserMetadata, pack_topic_resource_name, unpack_topic_resource_name};
use mosaico_marshal::{FlightAction, MarshalError, QueryResponse, QueryResponseItem};
use mosaico_query::Query;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionStatus {
    Open,
    Closed,
}

/// The main client of the Mosaico data platform.
///
/// Owns the control connection, a pool of data connections and a pool of
/// serialization lanes sized to the CPU count, plus the handler caches.
/// Writers created through [`MosaicoClient::sequence_create`] draw their
/// per-topic resources from the pools.
pub struct MosaicoClient {
    control: Connection,
    connection_pool: Option<Arc<ConnectionPool>>,
    lane_pool: Option<Arc<WorkerLanePool>>,

    sequence_handlers: Mutex<HashMap<String, Arc<SequenceHandler>>>,
    topic_handlers: Mutex<HashMap<String, Arc<TopicHandler>>>,

    status: ConnectionStatus,
}

impl MosaicoClient {
    /// Connects to the server, opening the control connection first and
    /// then both pools. A failure anywhere is fatal and releases whatever
    /// was already opened.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let control = Connection::open(host, port, timeout).await?;

        let connection_pool =
            ConnectionPool::open(host, port, ConnectionPool::default_pool_size(), timeout).await?;
        let lane_pool = WorkerLanePool::new(WorkerLanePool::default_pool_size())?;

        Ok(Self {
            control,
            connection_pool: Some(Arc::new(connection_pool)),
            lane_pool: Some(Arc::new(lane_pool)),
            sequence_handlers: Mutex::new(HashMap::new()),
            topic_handlers: Mutex::new(HashMap::new()),
            status: ConnectionStatus::Open,
        })
    }

    /// Retrieves a handler for an existing sequence.
    ///
    /// Handlers are cached, subsequent calls for the same sequence return
    /// the existing instance. Lookup failures are logged and reported as
    /// `None`.
    pub async fn sequence_handler(&self, sequence_name: &str) -> Option<Arc<SequenceHandler>> {
        if let Some(handler) = self
            .sequence_handlers
            .lock()
            .expect("sequence handler cache poisoned")
            .get(sequence_name)
        {
            return Some(handler.clone());
        }

        match SequenceHandler::connect(sequence_name, self.control.clone()).await {
            Ok(handler) => {
                let handler = Arc::new(handler);
                self.sequence_handlers
                    .lock()
                    .expect("sequence handler cache poisoned")
                    .insert(sequence_name.to_owned(), handler.clone());
                Some(handler)
            }
            Err(e) => {
                error!("server error while asking for sequence descriptor: {e}");
                None
            }
        }
    }

    /// Retrieves a handler for an existing topic, cached under its packed
    /// resource name.
    pub async fn topic_handler(
        &self,
        sequence_name: &str,
        topic_name: &str,
    ) -> Option<Arc<TopicHandler>> {
        let resource_name = pack_topic_resource_name(sequence_name, topic_name);

        if let Some(handler) = self
            .topic_handlers
            .lock()
            .expect("topic handler cache poisoned")
            .get(&resource_name)
        {
            return Some(handler.clone());
        }

        match TopicHandler::connect(sequence_name, topic_name, self.control.clone()).await {
            Ok(handler) => {
                let handler = Arc::new(handler);
                self.topic_handlers
                    .lock()
                    .expect("topic handler cache poisoned")
                    .insert(resource_name, handler.clone());
                Some(handler)
            }
            Err(e) => {
                error!("server error while asking for topic descriptor: {e}");
                None
            }
        }
    }

    /// Creates a [`SequenceWriter`] to upload a new sequence, primed with
    /// the client's pools and the configured batching thresholds.
    pub async fn sequence_create(
        &self,
        sequence_name: &str,
        metadata: UserMetadata,
        config: WriterConfig,
    ) -> Result<SequenceWriter, ClientError> {
        SequenceWriter::create(
            sequence_name,
            metadata,
            self.control.clone(),
            self.connection_pool.clone(),
            self.lane_pool.clone(),
            config,
        )
        .await
    }

    /// Deletes a sequence from the server, evicting its cached handler.
    /// Server-side failures are logged, not raised.
    pub async fn sequence_delete(&self, sequence_name: &str) {
        match do_action_unit(
            &self.control,
            FlightAction::SequenceDelete,
            serde_json::json!({ "name": sequence_name }),
        )
        .await
        {
            Ok(()) => {
                self.sequence_handlers
                    .lock()
                    .expect("sequence handler cache poisoned")
                    .remove(sequence_name);
            }
            Err(e) => error!("server error while asking for sequence deletion: {e}"),
        }
    }

    /// Executes a query against the platform catalog. The per-domain
    /// builders of `query` are joined in AND by the server.
    ///
    /// Topics in the response arrive as packed resource names and are
    /// normalized back to their `/topic` form.
    pub async fn query(&self, query: Query) -> Result<Vec<QueryResponseItem>, ClientError> {
        if query.is_empty() {
            return Err(ClientError::State(
                "expected at least one query builder".to_owned(),
            ));
        }

        let response: Option<QueryResponse> =
            do_action(&self.control, FlightAction::Query, query.to_value()).await?;
        let response = response.ok_or(ClientError::NoResponse("query"))?;

        let mut items = Vec::with_capacity(response.items.len());
        for item in response.items {
            let mut topics = Vec::with_capacity(item.topics.len());
            for packed in item.topics {
                let (_, topic_name) = unpack_topic_resource_name(&packed).ok_or_else(|| {
                    ClientError::Protocol(MarshalError::DeserializationError(format!(
                        "invalid topic name in response: {packed}"
                    )))
                })?;
                topics.push(topic_name);
            }
            items.push(QueryResponseItem {
                sequence: item.sequence,
                topics,
            });
        }

        Ok(items)
    }

    pub fn clear_sequence_handlers_cache(&self) {
        self.sequence_handlers
            .lock()
            .expect("sequence handler cache poisoned")
            .clear();
    }

    pub fn clear_topic_handlers_cache(&self) {
        self.topic_handlers
            .lock()
            .expect("topic handler cache poisoned")
            .clear();
    }

    /// Gracefully shuts the client down: drops the cached handlers, then
    /// both pools, then the control connection.
    ///
    /// Writers still holding pool resources keep them alive until they
    /// finalize; new writers cannot be created afterwards.
    pub async fn close(&mut self) {
        if self.status == ConnectionStatus::Closed {
            return;
        }

        self.clear_sequence_handlers_cache();
        self.clear_topic_handlers_cache();

        self.connection_pool.take();
        self.lane_pool.take();

        self.status = ConnectionStatus::Closed;
        info!("mosaico client closed");
    }
}

impl Drop for MosaicoClient {
    fn drop(&mut self) {
        if self.status == ConnectionStatus::Open {
            warn!(
                "mosaico client dropped without close(), resources may not have been released properly"
            );
        }
    }
}
