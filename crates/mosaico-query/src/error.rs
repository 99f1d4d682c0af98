/// Errors that can occur during the construction of a query.
///
/// All of them are raised client-side, before any network call.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid field `{name}` for path `{path}`, available fields: {available:?}")]
    InvalidField {
        path: String,
        name: String,
        available: Vec<String>,
    },

    #[error("field `{path}` has no operator `{op}`, available operators: {available:?}")]
    InvalidOperator {
        path: String,
        op: &'static str,
        available: &'static [&'static str],
    },

    #[error(
        "field `{path}` is a queryable dictionary, use indexed access (`key(\"...\")`) instead of `{name}`"
    )]
    DictAccess { path: String, name: String },

    #[error("field `{path}` is not a dictionary, indexed access is not available")]
    IndexAccess { path: String },

    #[error("bad value for field `{path}` :: {reason}")]
    BadValue { path: String, reason: String },

    #[error("invalid expression operator `{0}`: must start with '$'")]
    BadOperatorFormat(String),

    #[error("query builder already contains the key `{0}`, a key can appear only once per query")]
    DuplicateKey(String),

    #[error("expected a key of shape 'ontology_tag.field0.field1...', got `{0}`")]
    BadKeyPath(String),

    #[error(
        "not implemented :: a builder can query a single ontology tag, got `{got}` after `{existing}`"
    )]
    SingleOntologyTagOnly { existing: String, got: String },

    #[error("expected a {expected} expression, got a {got} expression")]
    DomainMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("duplicate query domain `{0}`, multiple builders of the same domain would override each other")]
    DuplicateDomain(&'static str),
}

impl QueryError {
    pub fn bad_value(path: &str, reason: impl Into<String>) -> Self {
        Self::BadValue {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}
