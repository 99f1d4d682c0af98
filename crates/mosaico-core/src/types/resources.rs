use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("invalid characters '/' in sequence name :: {0}")]
    InvalidSequenceName(String),
}

/// Builds the full resource name of a topic as known to the server.
///
/// Leading `/` are stripped from both components and the two are joined
/// with a single `/`.
///
/// # Example
/// `pack_topic_resource_name("seq_1", "/camera/front")` -> `"seq_1/camera/front"`
pub fn pack_topic_resource_name(sequence_name: &str, topic_name: &str) -> String {
    let sequence_name = sequence_name.trim_start_matches('/');
    let topic_name = topic_name.trim_start_matches('/');
    format!("{sequence_name}/{topic_name}")
}

/// Splits a full resource name back into `(sequence_name, topic_name)`.
///
/// The topic side keeps its leading `/` so it round-trips with the names
/// users pass to `topic_create`. Names without a separator do not unpack.
pub fn unpack_topic_resource_name(resource_name: &str) -> Option<(String, String)> {
    let resource_name = resource_name.trim_start_matches('/');

    let (sequence_name, topic_name) = resource_name.split_once('/')?;
    if sequence_name.is_empty() || topic_name.is_empty() {
        return None;
    }

    Some((sequence_name.to_owned(), format!("/{topic_name}")))
}

/// Validates a user-supplied sequence name.
///
/// A sequence name is a single path segment: after stripping the optional
/// leading `/` it must not contain any further separator.
pub fn validate_sequence_name(name: &str) -> Result<(), ResourceError> {
    let stripped = name.trim_start_matches('/');
    if stripped.contains('/') {
        return Err(ResourceError::InvalidSequenceName(name.to_owned()));
    }
    Ok(())
}
