use crate::ClientError;
use crate::comm::Connection;
use arrow_flight::Action;
use futures::TryStreamExt;
use log::{debug, warn};
use mosaico_marshal::{
    ActionResponseChunk, FlightAction, MarshalError, decode_action_response, decode_expected,
};
use serde::de::DeserializeOwned;

/// Executes a control-plane action and decodes its response into the
/// caller-expected variant.
///
/// The payload is encoded as UTF-8 JSON. At most one non-empty response
/// chunk is used, further chunks are ignored. A chunk failing the envelope
/// rules (missing `action`, the literal `empty`, or a mismatching name)
/// counts as no response.
pub async fn do_action<T: DeserializeOwned>(
    conn: &Connection,
    action: FlightAction,
    payload: serde_json::Value,
) -> Result<Option<T>, ClientError> {
    debug!("sending flight action '{action}'");

    let body = serde_json::to_vec(&payload)
        .map_err(|e| ClientError::Protocol(MarshalError::SerializationError(e.to_string())))?;

    let mut client = conn.flight();
    let results = client.do_action(Action::new(action.as_str(), body)).await?;

    let mut results = std::pin::pin!(results);
    while let Some(chunk) = results.try_next().await? {
        if chunk.is_empty() {
            continue;
        }

        return match decode_action_response(action, &chunk)? {
            ActionResponseChunk::Empty => {
                debug!("action '{action}' response carried no body");
                Ok(None)
            }
            ActionResponseChunk::Mismatch { returned } => {
                warn!("unexpected action in response: got '{returned}', expected '{action}'");
                Ok(None)
            }
            ActionResponseChunk::Response(response) => {
                Ok(Some(decode_expected(action, response)?))
            }
        };
    }

    debug!("no response body found for flight action '{action}'");
    Ok(None)
}

/// Executes an action whose response body, if any, is irrelevant
/// (finalize, abort, delete, notifications).
pub async fn do_action_unit(
    conn: &Connection,
    action: FlightAction,
    payload: serde_json::Value,
) -> Result<(), ClientError> {
    do_action::<serde_json::Value>(conn, action, payload)
        .await
        .map(|_| ())
}
