use crate::MarshalError;
use mosaico_core::types::{Format, UserMetadata};
use std::collections::HashMap;
use std::str::FromStr;

/// Namespace prefix of every framework key in Flight schema metadata. The
/// prefix is an internal contract with the mosaico server.
const MOSAICO_PREFIX: &str = "mosaico:";

/// Prefix marking internal ROS bridge keys, filtered out of the user
/// metadata before it reaches the caller.
const ROS_KEY_PREFIX: &str = "ros:";

/// Metadata decoded from the schema annotations of a sequence flight.
#[derive(Debug, Clone)]
pub struct SequenceMetadata {
    pub user_metadata: UserMetadata,
}

impl SequenceMetadata {
    /// Decodes the `mosaico:*` annotated metadata of a sequence schema.
    pub fn from_schema_metadata(mdata: &HashMap<String, String>) -> Result<Self, MarshalError> {
        expect_context(mdata, "sequence")?;

        Ok(Self {
            user_metadata: decode_user_metadata(mdata)?,
        })
    }
}

/// System properties of a topic carried in its schema annotations.
#[derive(Debug, Clone)]
pub struct TopicProperties {
    pub ontology_tag: String,
    pub serialization_format: Format,
}

/// Metadata decoded from the schema annotations of a topic flight.
#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub properties: TopicProperties,
    pub user_metadata: UserMetadata,
}

impl TopicMetadata {
    /// Decodes the `mosaico:*` annotated metadata of a topic schema.
    pub fn from_schema_metadata(mdata: &HashMap<String, String>) -> Result<Self, MarshalError> {
        expect_context(mdata, "topic")?;

        let properties = get_value(mdata, "properties")?;
        let ontology_tag = properties
            .get("ontology_tag")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| MarshalError::MissingKey("properties.ontology_tag".to_owned()))?
            .to_owned();
        let serialization_format = properties
            .get("serialization_format")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| MarshalError::MissingKey("properties.serialization_format".to_owned()))
            .and_then(|raw| {
                Format::from_str(raw).map_err(|e| MarshalError::DeserializationError(e.to_string()))
            })?;

        Ok(Self {
            properties: TopicProperties {
                ontology_tag,
                serialization_format,
            },
            user_metadata: decode_user_metadata(mdata)?,
        })
    }
}

/// Retrieves a namespaced value from schema metadata, abstracting the
/// `mosaico:` prefix away from the caller. Values are JSON-decoded when
/// possible and kept as plain strings otherwise.
fn get_value(mdata: &HashMap<String, String>, key: &str) -> Result<serde_json::Value, MarshalError> {
    let full_key = format!("{MOSAICO_PREFIX}{key}");
    let raw = mdata
        .get(&full_key)
        .ok_or_else(|| MarshalError::MissingKey(full_key.clone()))?;

    Ok(serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.clone())))
}

fn expect_context(
    mdata: &HashMap<String, String>,
    expected: &'static str,
) -> Result<(), MarshalError> {
    let context = get_value(mdata, "context")?;
    let got = context.as_str().unwrap_or_default();
    if got != expected {
        return Err(MarshalError::BadContext {
            expected,
            got: got.to_owned(),
        });
    }
    Ok(())
}

fn decode_user_metadata(mdata: &HashMap<String, String>) -> Result<UserMetadata, MarshalError> {
    let raw = get_value(mdata, "user_metadata")?;
    let object = match raw {
        serde_json::Value::Object(map) => map,
        _ => {
            return Err(MarshalError::DeserializationError(
                "user_metadata is not a JSON object".to_owned(),
            ));
        }
    };

    Ok(object
        .into_iter()
        .filter(|(key, _)| !key.starts_with(ROS_KEY_PREFIX))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_metadata() -> HashMap<String, String> {
        HashMap::from([
            ("mosaico:context".to_owned(), "topic".to_owned()),
            (
                "mosaico:properties".to_owned(),
                r#"{"ontology_tag":"imu","serialization_format":"default"}"#.to_owned(),
            ),
            (
                "mosaico:user_metadata".to_owned(),
                r#"{"serial":"X-01","ros:topic":"/imu/raw","rate_hz":100,"gyros:hz":200}"#
                    .to_owned(),
            ),
        ])
    }

    #[test]
    fn topic_metadata_decoding() {
        let decoded = TopicMetadata::from_schema_metadata(&topic_metadata()).unwrap();
        assert_eq!(decoded.properties.ontology_tag, "imu");
        assert_eq!(decoded.properties.serialization_format, Format::Default);

        // Internal ROS keys are filtered out of the user view, keys merely
        // containing the prefix substring are not
        assert_eq!(decoded.user_metadata.len(), 3);
        assert!(decoded.user_metadata.contains_key("serial"));
        assert!(decoded.user_metadata.contains_key("rate_hz"));
        assert!(decoded.user_metadata.contains_key("gyros:hz"));
        assert!(!decoded.user_metadata.contains_key("ros:topic"));
    }

    #[test]
    fn context_is_enforced() {
        let err = SequenceMetadata::from_schema_metadata(&topic_metadata()).unwrap_err();
        assert!(matches!(err, MarshalError::BadContext { .. }));
    }

    #[test]
    fn missing_keys_surface() {
        let err = TopicMetadata::from_schema_metadata(&HashMap::new()).unwrap_err();
        assert!(matches!(err, MarshalError::MissingKey(_)));
    }
}
