use thiserror::Error;

/// Errors raised while assembling schemas, registering ontologies or moving
/// rows across the columnar boundary.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("ontology tag '{0}' is already registered")]
    DuplicateTag(String),

    #[error("no ontology registered with tag '{tag}', available tags: {available:?}")]
    UnknownOntology { tag: String, available: Vec<String> },

    #[error("fields name collision between ontology '{tag}' and the message envelope :: {fields:?}")]
    SchemaCollision { tag: String, fields: Vec<String> },

    #[error("missing required field '{0}' in row")]
    MissingField(String),

    #[error("field '{field}' has an incompatible value, expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("column '{field}' of type {datatype} is not supported by the columnar codec")]
    UnsupportedColumnType { field: String, datatype: String },

    #[error("null value in non-nullable column '{0}'")]
    NullInNonNullable(String),

    #[error("arrow error :: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl ModelError {
    pub fn type_mismatch(field: &str, expected: &str) -> Self {
        Self::TypeMismatch {
            field: field.to_owned(),
            expected: expected.to_owned(),
        }
    }
}
