use crate::MarshalError;
use mosaico_core::types::unpack_topic_resource_name;
use serde::Serialize;

/// Identity of the topic a DoPut stream uploads to: the packed resource
/// name plus the server-issued ownership key.
#[derive(Debug, Serialize)]
struct DoPutTopic<'a> {
    name: &'a str,
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct DoPutCmd<'a> {
    topic: DoPutTopic<'a>,
}

/// Serializes the DoPut descriptor command identifying the upload target.
///
/// # Example
/// `{"topic":{"name":"seq_1/camera/front","key":"<topic-key>"}}`
pub fn do_put_descriptor_cmd(resource_name: &str, key: &str) -> Result<Vec<u8>, MarshalError> {
    serde_json::to_vec(&DoPutCmd {
        topic: DoPutTopic {
            name: resource_name,
            key,
        },
    })
    .map_err(|e| MarshalError::SerializationError(e.to_string()))
}

/// Decodes a flight-endpoint ticket into `(sequence_name, topic_name)`.
///
/// Tickets are UTF-8 packed resource names, with an optional leading `/`.
/// Invalid tickets yield `None`, the caller decides whether to skip or fail.
pub fn parse_endpoint_ticket(ticket: &[u8]) -> Option<(String, String)> {
    let raw = std::str::from_utf8(ticket).ok()?;
    unpack_topic_resource_name(raw)
}
