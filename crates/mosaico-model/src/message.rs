use crate::{ModelError, Ontology, OntologyData, Row, ontology_descriptor, unknown_ontology};
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use mosaico_core::types::{Format, Time, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the mandatory envelope column carrying the middleware-ingest
/// timestamp. Every record batch on the wire has it.
pub const TIMESTAMP_COLUMN: &str = "timestamp_ns";

/// Name of the optional envelope column carrying the acquisition sub-header.
pub const HEADER_COLUMN: &str = "message_header";

/// The Arrow fields of the message envelope, prepended to every payload
/// schema. Owned here so the envelope and the ontology layer stay decoupled.
pub fn envelope_fields() -> Fields {
    Fields::from(vec![
        Field::new(TIMESTAMP_COLUMN, DataType::Int64, false),
        Field::new(HEADER_COLUMN, DataType::Struct(header_fields()), true),
    ])
}

fn header_fields() -> Fields {
    Fields::from(vec![
        Field::new("seq", DataType::UInt32, true),
        Field::new(
            "stamp",
            DataType::Struct(Fields::from(vec![
                Field::new("sec", DataType::Int64, true),
                Field::new("nanosec", DataType::UInt32, true),
            ])),
            true,
        ),
        Field::new("frame_id", DataType::Utf8, true),
    ])
}

/// Acquisition sub-header, modeled after common robotics middleware: an
/// optional legacy sequence id, the acquisition stamp and a spatial frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
    pub seq: Option<u32>,
}

impl Header {
    pub fn new(stamp: Time, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
            seq: None,
        }
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    fn to_value(&self) -> Value {
        let mut stamp = BTreeMap::new();
        stamp.insert("sec".to_owned(), Value::Int(self.stamp.sec()));
        stamp.insert("nanosec".to_owned(), Value::UInt(self.stamp.nanosec() as u64));

        let mut fields = BTreeMap::new();
        fields.insert("seq".to_owned(), Value::from(self.seq));
        fields.insert("stamp".to_owned(), Value::Struct(stamp));
        fields.insert("frame_id".to_owned(), Value::Str(self.frame_id.clone()));
        Value::Struct(fields)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let fields = value.as_struct()?;
        let stamp = fields.get("stamp")?.as_struct()?;
        let sec = stamp.get("sec")?.as_i64()?;
        let nanosec = stamp.get("nanosec")?.as_u64()?;

        Some(Self {
            stamp: Time::new(sec, nanosec as i64).ok()?,
            frame_id: fields
                .get("frame_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            seq: fields
                .get("seq")
                .and_then(Value::as_u64)
                .map(|seq| seq as u32),
        })
    }
}

/// The universal transport container: envelope plus one ontology payload.
///
/// The envelope timestamp is the middleware processing instant in
/// nanoseconds, distinct from the acquisition stamp carried by the header.
pub struct Message {
    timestamp_ns: i64,
    header: Option<Header>,
    data: Box<dyn OntologyData>,
}

impl Message {
    /// Wraps a payload into an envelope.
    ///
    /// Fails when a payload column name collides with an envelope column
    /// name, such rows could not be flattened into a single schema.
    pub fn new(timestamp_ns: i64, data: impl OntologyData + 'static) -> Result<Self, ModelError> {
        Self::build(timestamp_ns, None, Box::new(data))
    }

    pub fn with_header(
        timestamp_ns: i64,
        data: impl OntologyData + 'static,
        header: Header,
    ) -> Result<Self, ModelError> {
        Self::build(timestamp_ns, Some(header), Box::new(data))
    }

    fn build(
        timestamp_ns: i64,
        header: Option<Header>,
        data: Box<dyn OntologyData>,
    ) -> Result<Self, ModelError> {
        let mut payload = Row::new();
        data.encode_into(&mut payload);

        let colliding: Vec<String> = payload
            .keys()
            .filter(|key| key.as_str() == TIMESTAMP_COLUMN || key.as_str() == HEADER_COLUMN)
            .cloned()
            .collect();
        if !colliding.is_empty() {
            return Err(ModelError::SchemaCollision {
                tag: data.ontology_tag().to_owned(),
                fields: colliding,
            });
        }

        Ok(Self {
            timestamp_ns,
            header,
            data,
        })
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn ontology_tag(&self) -> &'static str {
        self.data.ontology_tag()
    }

    pub fn serialization_format(&self) -> Format {
        self.data.serialization_format()
    }

    pub fn data(&self) -> &dyn OntologyData {
        self.data.as_ref()
    }

    /// Typed accessor for the payload.
    pub fn data_as<T: Ontology>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }

    /// Flattens the message into a single row, envelope columns first.
    pub fn encode(&self) -> Row {
        let mut row = Row::new();
        row.insert(TIMESTAMP_COLUMN.to_owned(), Value::Int(self.timestamp_ns));
        row.insert(
            HEADER_COLUMN.to_owned(),
            match &self.header {
                Some(header) => header.to_value(),
                None => Value::Null,
            },
        );
        self.data.encode_into(&mut row);
        row
    }

    /// Rebuilds a message from a flat row, routing the payload columns
    /// through the ontology registered under `tag`.
    pub fn from_row(tag: &str, row: &Row) -> Result<Self, ModelError> {
        let descriptor = ontology_descriptor(tag).ok_or_else(|| unknown_ontology(tag))?;

        let timestamp_ns = row
            .get(TIMESTAMP_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| ModelError::MissingField(TIMESTAMP_COLUMN.to_owned()))?;

        let header = row.get(HEADER_COLUMN).and_then(Header::from_value);
        let data = descriptor.decode(row)?;

        Self::build(timestamp_ns, header, data)
    }

    /// The combined envelope + payload schema for the ontology registered
    /// under `tag`.
    pub fn combined_schema(tag: &str) -> Result<SchemaRef, ModelError> {
        let descriptor = ontology_descriptor(tag).ok_or_else(|| unknown_ontology(tag))?;
        combine_schema(tag, descriptor.payload_fields())
    }

    /// The combined schema for a statically known ontology type.
    pub fn combined_schema_of<T: Ontology>() -> Result<SchemaRef, ModelError> {
        combine_schema(T::TAG, T::payload_fields())
    }
}

fn combine_schema(tag: &str, payload: Fields) -> Result<SchemaRef, ModelError> {
    let envelope = envelope_fields();

    let colliding: Vec<String> = payload
        .iter()
        .filter(|field| envelope.find(field.name()).is_some())
        .map(|field| field.name().clone())
        .collect();
    if !colliding.is_empty() {
        return Err(ModelError::SchemaCollision {
            tag: tag.to_owned(),
            fields: colliding,
        });
    }

    let fields: Vec<Arc<Field>> = envelope.iter().chain(payload.iter()).cloned().collect();
    Ok(Arc::new(Schema::new(fields)))
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("timestamp_ns", &self.timestamp_ns)
            .field("header", &self.header)
            .field("ontology_tag", &self.data.ontology_tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_ontology;
    use std::sync::Once;

    /// Minimal scalar payload used by the envelope tests.
    struct Pulse {
        level: f64,
    }

    impl Ontology for Pulse {
        const TAG: &'static str = "test_pulse";
        const FORMAT: Format = Format::Default;

        fn payload_fields() -> Fields {
            Fields::from(vec![Field::new("level", DataType::Float64, false)])
        }

        fn encode_payload(&self, out: &mut Row) {
            out.insert("level".to_owned(), Value::Float(self.level));
        }

        fn decode_payload(row: &Row) -> Result<Self, ModelError> {
            let level = row
                .get("level")
                .and_then(Value::as_f64)
                .ok_or_else(|| ModelError::MissingField("level".to_owned()))?;
            Ok(Self { level })
        }
    }

    /// Payload whose column name collides with the envelope timestamp.
    struct Clash;

    impl Ontology for Clash {
        const TAG: &'static str = "test_clash";
        const FORMAT: Format = Format::Default;

        fn payload_fields() -> Fields {
            Fields::from(vec![Field::new(TIMESTAMP_COLUMN, DataType::Int64, false)])
        }

        fn encode_payload(&self, out: &mut Row) {
            out.insert(TIMESTAMP_COLUMN.to_owned(), Value::Int(0));
        }

        fn decode_payload(_row: &Row) -> Result<Self, ModelError> {
            Ok(Self)
        }
    }

    fn register_fixtures() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            register_ontology::<Pulse>().unwrap();
        });
    }

    #[test]
    fn envelope_payload_collision_is_rejected() {
        let err = Message::new(10, Clash).unwrap_err();
        assert!(matches!(err, ModelError::SchemaCollision { .. }));

        let err = Message::combined_schema_of::<Clash>().unwrap_err();
        assert!(matches!(err, ModelError::SchemaCollision { .. }));
    }

    #[test]
    fn encode_and_rebuild_round_trip() {
        register_fixtures();

        let header = Header::new(Time::new(5, 250).unwrap(), "base_link").with_seq(7);
        let msg = Message::with_header(1_000, Pulse { level: 0.25 }, header.clone()).unwrap();

        let row = msg.encode();
        assert_eq!(row.get(TIMESTAMP_COLUMN), Some(&Value::Int(1_000)));

        let back = Message::from_row(Pulse::TAG, &row).unwrap();
        assert_eq!(back.timestamp_ns(), 1_000);
        assert_eq!(back.header(), Some(&header));
        assert_eq!(back.data_as::<Pulse>().unwrap().level, 0.25);
    }

    #[test]
    fn from_row_requires_timestamp() {
        register_fixtures();

        let mut row = Row::new();
        row.insert("level".to_owned(), Value::Float(1.0));
        let err = Message::from_row(Pulse::TAG, &row).unwrap_err();
        assert!(matches!(err, ModelError::MissingField(_)));
    }

    #[test]
    fn unknown_tag_lists_registered_ones() {
        register_fixtures();

        let err = Message::from_row("no_such_tag", &Row::new()).unwrap_err();
        match err {
            ModelError::UnknownOntology { available, .. } => {
                assert!(available.contains(&Pulse::TAG.to_owned()))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn combined_schema_prepends_envelope() {
        register_fixtures();

        let schema = Message::combined_schema(Pulse::TAG).unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec![TIMESTAMP_COLUMN, HEADER_COLUMN, "level"]);
    }
}
