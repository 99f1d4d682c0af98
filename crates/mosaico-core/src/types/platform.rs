use super::{DateTime, Format};
use std::collections::BTreeMap;

/// User-supplied metadata attached to a sequence or a topic.
pub type UserMetadata = BTreeMap<String, serde_json::Value>;

/// System-level statistics shared by both catalog entities.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Total size in bytes of the data stored on the server.
    pub total_size_bytes: i64,
    /// True if the resource is locked, i.e. its write lifecycle was closed
    /// gracefully and the data is immutable.
    pub is_locked: bool,
    /// Datetime of the resource creation
    pub created_datetime: DateTime,
    /// Number of chunks stored for the resource. Only topics report it.
    pub chunks_number: Option<i64>,
}

// ////////////////////////////////////////////////////////////////////////////
// SEQUENCE
// ////////////////////////////////////////////////////////////////////////////

/// Read-only catalog view of a sequence: a named recording session grouping
/// several topics (e.g. camera, IMU and GPS streams of one drive).
#[derive(Debug, Clone)]
pub struct Sequence {
    name: String,
    user_metadata: UserMetadata,
    system_info: SystemInfo,
    topics: Vec<String>,
}

impl Sequence {
    pub fn new(
        name: String,
        user_metadata: UserMetadata,
        system_info: SystemInfo,
        topics: Vec<String>,
    ) -> Self {
        Self {
            name,
            user_metadata,
            system_info,
            topics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user_metadata(&self) -> &UserMetadata {
        &self.user_metadata
    }

    pub fn created_datetime(&self) -> DateTime {
        self.system_info.created_datetime
    }

    pub fn is_locked(&self) -> bool {
        self.system_info.is_locked
    }

    pub fn total_size_bytes(&self) -> i64 {
        self.system_info.total_size_bytes
    }

    /// Names of the topics contained in this sequence, in `/topic` form.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[sequence|{}]", self.name)
    }
}

// ////////////////////////////////////////////////////////////////////////////
// TOPIC
// ////////////////////////////////////////////////////////////////////////////

/// Read-only catalog view of a topic: one logical stream inside a sequence,
/// carrying exactly one ontology.
#[derive(Debug, Clone)]
pub struct Topic {
    sequence_name: String,
    name: String,
    ontology_tag: String,
    serialization_format: Format,
    user_metadata: UserMetadata,
    system_info: SystemInfo,
}

impl Topic {
    pub fn new(
        sequence_name: String,
        name: String,
        ontology_tag: String,
        serialization_format: Format,
        user_metadata: UserMetadata,
        system_info: SystemInfo,
    ) -> Self {
        Self {
            sequence_name,
            name,
            ontology_tag,
            serialization_format,
            user_metadata,
            system_info,
        }
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ontology type identifier (e.g. `imu`, `gnss`), matching the tag
    /// under which the payload type is registered client-side.
    pub fn ontology_tag(&self) -> &str {
        &self.ontology_tag
    }

    pub fn serialization_format(&self) -> Format {
        self.serialization_format
    }

    pub fn user_metadata(&self) -> &UserMetadata {
        &self.user_metadata
    }

    pub fn created_datetime(&self) -> DateTime {
        self.system_info.created_datetime
    }

    pub fn is_locked(&self) -> bool {
        self.system_info.is_locked
    }

    pub fn total_size_bytes(&self) -> i64 {
        self.system_info.total_size_bytes
    }

    pub fn chunks_number(&self) -> Option<i64> {
        self.system_info.chunks_number
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[topic|{}|{}]", self.sequence_name, self.name)
    }
}
