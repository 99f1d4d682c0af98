use crate::ModelError;
use arrow::datatypes::Fields;
use mosaico_core::types::{Format, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

/// A row crossing the columnar boundary: column name to cell value.
pub type Row = BTreeMap<String, Value>;

/// An ontology payload type: one concrete sensor data model (IMU, GPS,
/// compressed image, ...) transmitted to the platform.
///
/// Implementors declare their tag, their serialization format and their
/// Arrow payload columns, and provide the row-level encode/decode pair the
/// writers and readers go through. Types become visible to the tag factory
/// only after an explicit [`register_ontology`] call at startup.
pub trait Ontology: Send + Sync + 'static {
    /// Unique string identifier of this payload type in the registry.
    const TAG: &'static str;

    /// Batching and storage hint for topics carrying this type.
    const FORMAT: Format;

    /// The Arrow fields of the payload columns. Envelope columns are not
    /// included, the combined schema is assembled per topic.
    fn payload_fields() -> Fields;

    /// Writes this payload's column values into `out`, one entry per
    /// payload field.
    fn encode_payload(&self, out: &mut Row);

    /// Rebuilds the payload from a flat row. The row also carries the
    /// envelope columns, implementations pick only their own fields.
    fn decode_payload(row: &Row) -> Result<Self, ModelError>
    where
        Self: Sized;
}

/// Object-safe view of an ontology payload, the form carried inside a
/// message envelope.
pub trait OntologyData: Send + Sync {
    fn ontology_tag(&self) -> &'static str;

    fn serialization_format(&self) -> Format;

    /// Writes the payload column values into `out`.
    fn encode_into(&self, out: &mut Row);

    fn as_any(&self) -> &dyn Any;
}

impl<T: Ontology> OntologyData for T {
    fn ontology_tag(&self) -> &'static str {
        T::TAG
    }

    fn serialization_format(&self) -> Format {
        T::FORMAT
    }

    fn encode_into(&self, out: &mut Row) {
        self.encode_payload(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry entry describing one registered ontology type.
pub struct OntologyDescriptor {
    tag: &'static str,
    format: Format,
    payload_fields: fn() -> Fields,
    decode: fn(&Row) -> Result<Box<dyn OntologyData>, ModelError>,
}

impl OntologyDescriptor {
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn payload_fields(&self) -> Fields {
        (self.payload_fields)()
    }

    /// Materializes a payload object from a flat row via the registered
    /// constructor.
    pub fn decode(&self, row: &Row) -> Result<Box<dyn OntologyData>, ModelError> {
        (self.decode)(row)
    }
}

type Registry = RwLock<BTreeMap<&'static str, Arc<OntologyDescriptor>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(BTreeMap::new()))
}

/// Registers an ontology type in the process-global tag registry.
///
/// Must be called once per type, at startup, before any topic carrying the
/// type is written or read. A second registration of the same tag fails.
pub fn register_ontology<T: Ontology>() -> Result<(), ModelError> {
    let descriptor = OntologyDescriptor {
        tag: T::TAG,
        format: T::FORMAT,
        payload_fields: T::payload_fields,
        decode: |row| T::decode_payload(row).map(|data| Box::new(data) as Box<dyn OntologyData>),
    };

    let mut reg = registry().write().expect("ontology registry poisoned");
    if reg.contains_key(T::TAG) {
        return Err(ModelError::DuplicateTag(T::TAG.to_owned()));
    }
    reg.insert(T::TAG, Arc::new(descriptor));
    Ok(())
}

/// Looks up the descriptor registered under `tag`.
pub fn ontology_descriptor(tag: &str) -> Option<Arc<OntologyDescriptor>> {
    registry()
        .read()
        .expect("ontology registry poisoned")
        .get(tag)
        .cloned()
}

/// Returns all registered ontology tags.
pub fn registered_tags() -> Vec<String> {
    registry()
        .read()
        .expect("ontology registry poisoned")
        .keys()
        .map(|tag| (*tag).to_owned())
        .collect()
}

pub(crate) fn unknown_ontology(tag: &str) -> ModelError {
    ModelError::UnknownOntology {
        tag: tag.to_owned(),
        available: registered_tags(),
    }
}
