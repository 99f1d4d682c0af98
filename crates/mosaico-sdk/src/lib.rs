//! Rust SDK for the Mosaico data platform.
//!
//! The client uploads and downloads time-stamped multi-sensor recordings
//! (sequences of topics) over an Arrow Flight connection, and queries the
//! platform catalog with a typed builder DSL.
//!
//! ```no_run
//! use mosaico_sdk::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), mosaico_sdk::client::ClientError> {
//! let client = MosaicoClient::connect("localhost", 50051, Duration::from_secs(5)).await?;
//!
//! let mut writer = client
//!     .sequence_create("drive-042", Default::default(), WriterConfig::default())
//!     .await?;
//! // ... create topics, push messages ...
//! writer.finalize().await?;
//! # Ok(())
//! # }
//! ```
pub use mosaico_client as client;
pub use mosaico_core as core;
pub use mosaico_marshal as marshal;
pub use mosaico_model as model;
pub use mosaico_query as query;

/// The names most integrations need.
pub mod prelude {
    pub use mosaico_client::{
        MosaicoClient, OnErrorPolicy, SequenceDataStreamer, SequenceWriter, TopicDataStreamer,
        TopicWriter, WriterConfig,
    };
    pub use mosaico_core::types::{Format, Time, Timestamp, UserMetadata};
    pub use mosaico_model::{Header, Message, Ontology, register_ontology};
    pub use mosaico_query::{
        Query, QueryOntologyCatalog, QuerySequence, QueryTopic, ontology_proxy, sequence_proxy,
        topic_proxy,
    };
}
