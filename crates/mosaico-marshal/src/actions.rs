use crate::MarshalError;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Control-plane actions understood by the platform, the single source of
/// truth for the wire action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightAction {
    // Sequences related
    SequenceCreate,
    SequenceFinalize,
    SequenceNotifyCreate,
    SequenceSystemInfo,
    SequenceAbort,
    SequenceDelete,
    // Topics related
    TopicCreate,
    TopicNotifyCreate,
    TopicSystemInfo,
    TopicDelete,
    // Queries related
    Query,
}

impl FlightAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightAction::SequenceCreate => "sequence_create",
            FlightAction::SequenceFinalize => "sequence_finalize",
            FlightAction::SequenceNotifyCreate => "sequence_notify_create",
            FlightAction::SequenceSystemInfo => "sequence_system_info",
            FlightAction::SequenceAbort => "sequence_abort",
            FlightAction::SequenceDelete => "sequence_delete",
            FlightAction::TopicCreate => "topic_create",
            FlightAction::TopicNotifyCreate => "topic_notify_create",
            FlightAction::TopicSystemInfo => "topic_system_info",
            FlightAction::TopicDelete => "topic_delete",
            FlightAction::Query => "query",
        }
    }
}

impl std::fmt::Display for FlightAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decoded state of one action-result chunk.
#[derive(Debug)]
pub enum ActionResponseChunk {
    /// The server answered without a body for this action.
    Empty,
    /// The server answered for a different action than the one requested.
    Mismatch { returned: String },
    /// The `response` sub-object, ready for typed decoding.
    Response(serde_json::Value),
}

/// Decodes the raw body of an action result against the response envelope
/// contract: `{ "action": "<name>"|"empty", "response": {...} }`.
///
/// A chunk whose `action` field is missing or equals `"empty"` carries no
/// response, a mismatching name is reported as such, and only a matching
/// chunk yields its `response` sub-object.
pub fn decode_action_response(
    action: FlightAction,
    body: &[u8],
) -> Result<ActionResponseChunk, MarshalError> {
    let parsed: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| MarshalError::DeserializationError(e.to_string()))?;

    let returned = match parsed.get("action").and_then(serde_json::Value::as_str) {
        None | Some("empty") => return Ok(ActionResponseChunk::Empty),
        Some(returned) => returned,
    };

    if returned != action.as_str() {
        return Ok(ActionResponseChunk::Mismatch {
            returned: returned.to_owned(),
        });
    }

    match parsed.get("response") {
        None | Some(serde_json::Value::Null) => Ok(ActionResponseChunk::Empty),
        Some(response) => Ok(ActionResponseChunk::Response(response.clone())),
    }
}

/// Decodes a `response` sub-object into the caller-expected variant, turning
/// shape mismatches into protocol errors.
pub fn decode_expected<T: DeserializeOwned>(
    action: FlightAction,
    response: serde_json::Value,
) -> Result<T, MarshalError> {
    serde_json::from_value(response).map_err(|e| MarshalError::UnexpectedResponse {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

// ////////////////////////////////////////////////////////////////////////////
// RESPONSE VARIANTS
// ////////////////////////////////////////////////////////////////////////////

/// Response carrying a server-issued ownership key, returned by
/// `sequence_create` and `topic_create`.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyResponse {
    pub key: String,
}

/// Response carrying system information about a sequence or a topic.
///
/// The creation instant stays a string here, callers parse it with the core
/// `DateTime` type.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemInfoResponse {
    pub total_size_bytes: i64,
    pub created_datetime: String,
    pub is_locked: bool,
    #[serde(default)]
    pub chunks_number: Option<i64>,
}

/// One matching group returned by the `query` action.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QueryResponseItem {
    pub sequence: String,
    pub topics: Vec<String>,
}

/// Response of the `query` action.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub items: Vec<QueryResponseItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rules() {
        let action = FlightAction::SequenceCreate;

        let ok = decode_action_response(
            action,
            br#"{"action":"sequence_create","response":{"key":"abc"}}"#,
        )
        .unwrap();
        let response = match ok {
            ActionResponseChunk::Response(v) => v,
            other => panic!("expected a response, got {other:?}"),
        };
        let key: KeyResponse = decode_expected(action, response).unwrap();
        assert_eq!(key.key, "abc");

        // Missing action field
        assert!(matches!(
            decode_action_response(action, br#"{"response":{}}"#).unwrap(),
            ActionResponseChunk::Empty
        ));

        // Literal "empty"
        assert!(matches!(
            decode_action_response(action, br#"{"action":"empty"}"#).unwrap(),
            ActionResponseChunk::Empty
        ));

        // Mismatching action name
        assert!(matches!(
            decode_action_response(action, br#"{"action":"topic_create","response":{}}"#).unwrap(),
            ActionResponseChunk::Mismatch { .. }
        ));

        // Invalid JSON
        assert!(decode_action_response(action, b"not-json").is_err());
    }

    #[test]
    fn typed_decode_mismatch_is_a_protocol_error() {
        let err = decode_expected::<KeyResponse>(
            FlightAction::SequenceCreate,
            serde_json::json!({"unexpected": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, MarshalError::UnexpectedResponse { .. }));
    }

    #[test]
    fn system_info_chunks_number_is_optional() {
        let info: SystemInfoResponse = decode_expected(
            FlightAction::SequenceSystemInfo,
            serde_json::json!({
                "total_size_bytes": 42,
                "created_datetime": "2025-03-01T12:00:00Z",
                "is_locked": false
            }),
        )
        .unwrap();
        assert_eq!(info.total_size_bytes, 42);
        assert!(info.chunks_number.is_none());

        let info: SystemInfoResponse = decode_expected(
            FlightAction::TopicSystemInfo,
            serde_json::json!({
                "total_size_bytes": 42,
                "created_datetime": "2025-03-01T12:00:00Z",
                "is_locked": true,
                "chunks_number": 3
            }),
        )
        .unwrap();
        assert_eq!(info.chunks_number, Some(3));
    }
}
