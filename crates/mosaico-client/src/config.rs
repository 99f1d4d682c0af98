use crate::comm::{DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_SIZE_RECORDS};

/// Lifecycle state of a sequence during the writing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// Not yet registered on the server.
    Null,
    /// Registered on the server, accepting data, not yet finalized.
    Pending,
    /// Successfully closed, data is immutable.
    Finalized,
    /// Aborted or failed.
    Error,
}

/// Behavior applied when the caller abandons a sequence scope with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnErrorPolicy {
    /// Notify the server of the error but keep the partial data.
    Report,
    /// Abort the sequence and instruct the server to discard all data.
    Delete,
}

/// Configuration of the sequence and topic writers.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Action taken when a write scope fails.
    pub on_error: OnErrorPolicy,
    /// Byte threshold above which a buffered batch is flushed to the server.
    pub max_batch_size_bytes: usize,
    /// Record-count threshold for count-batched topics.
    pub max_batch_size_records: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            on_error: OnErrorPolicy::Delete,
            max_batch_size_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_batch_size_records: DEFAULT_MAX_BATCH_SIZE_RECORDS,
        }
    }
}

impl WriterConfig {
    pub fn with_on_error(mut self, policy: OnErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn with_max_batch_size_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_size_bytes = bytes;
        self
    }

    pub fn with_max_batch_size_records(mut self, records: usize) -> Self {
        self.max_batch_size_records = records;
        self
    }
}
