use crate::{
    Expression, QueryDomain, QueryError, catalog_dict_fields, combine_expressions,
};
use mosaico_core::types::Time;
use mosaico_model::Ontology;

fn validate_common(
    stored: &[Expression],
    expr: &Expression,
    domain: QueryDomain,
) -> Result<(), QueryError> {
    if expr.domain() != domain {
        return Err(QueryError::DomainMismatch {
            expected: domain.name(),
            got: expr.domain().name(),
        });
    }
    if !expr.op().starts_with('$') {
        return Err(QueryError::BadOperatorFormat(expr.op().to_owned()));
    }
    if stored.iter().any(|stored| stored.key() == expr.key()) {
        return Err(QueryError::DuplicateKey(expr.key().to_owned()));
    }
    Ok(())
}

fn ontology_tag_of(key: &str) -> Result<&str, QueryError> {
    match key.split_once('.') {
        Some((tag, rest)) if !tag.is_empty() && !rest.is_empty() => Ok(tag),
        _ => Err(QueryError::BadKeyPath(key.to_owned())),
    }
}

/// Builds the `$geq`/`$leq`/`$between` expression of a time-bounded helper.
fn range_expression(
    domain: QueryDomain,
    key: &str,
    start: Option<i64>,
    end: Option<i64>,
) -> Result<Expression, QueryError> {
    match (start, end) {
        (None, None) => Err(QueryError::bad_value(
            key,
            "at least one among 'time_start' and 'time_end' is mandatory",
        )),
        (Some(start), None) => Ok(Expression::new(domain, key, "$geq", serde_json::json!(start))),
        (None, Some(end)) => Ok(Expression::new(domain, key, "$leq", serde_json::json!(end))),
        (Some(start), Some(end)) => {
            if start > end {
                return Err(QueryError::bad_value(
                    key,
                    "'time_start' must be less than 'time_end'",
                ));
            }
            Ok(Expression::new(
                domain,
                key,
                "$between",
                serde_json::json!([start, end]),
            ))
        }
    }
}

/// Partitions expressions between flat platform fields and dictionary
/// fields, nesting the latter under their field with the prefix stripped.
fn partition_to_value(expressions: &[Expression], dict_fields: &[String]) -> serde_json::Value {
    let mut flat: Vec<Expression> = Vec::new();
    let mut buckets: Vec<(&String, Vec<&Expression>)> = Vec::new();

    for expr in expressions {
        let dict = dict_fields.iter().find(|dict| {
            expr.key() == dict.as_str() || expr.key().starts_with(&format!("{dict}."))
        });

        match dict {
            Some(dict) => match buckets.iter_mut().find(|(name, _)| *name == dict) {
                Some((_, bucket)) => bucket.push(expr),
                None => buckets.push((dict, vec![expr])),
            },
            None => flat.push(expr.clone()),
        }
    }

    let mut combined = match combine_expressions(&flat) {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    for (dict, bucket) in buckets {
        // Expressions on the dictionary itself carry no sub-key and are skipped
        let stripped: Vec<Expression> = bucket
            .iter()
            .filter_map(|expr| {
                expr.key()
                    .split_once('.')
                    .map(|(_, sub_key)| expr.with_key(sub_key))
            })
            .collect();

        if !stripped.is_empty() {
            combined.insert(dict.clone(), combine_expressions(&stripped));
        }
    }

    serde_json::Value::Object(combined)
}

// ////////////////////////////////////////////////////////////////////////////
// ONTOLOGY CATALOG
// ////////////////////////////////////////////////////////////////////////////

/// Query fragment over the data catalog of one ontology, an implicit AND of
/// its expressions.
///
/// Emits a flat payload of dot-notated paths, e.g.
/// `{"gps.satellites": {"$leq": 10}}`. All key paths must share the same
/// leading ontology tag.
#[derive(Debug, Default, Clone)]
pub struct QueryOntologyCatalog {
    expressions: Vec<Expression>,
}

impl QueryOntologyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(&self) -> QueryDomain {
        QueryDomain::Ontology
    }

    /// Adds an expression, rejecting wrong domains, malformed operators,
    /// duplicate key paths and key paths rooted at a different ontology tag.
    /// A rejected expression leaves the builder untouched.
    pub fn with_expression(&mut self, expr: Expression) -> Result<&mut Self, QueryError> {
        validate_common(&self.expressions, &expr, QueryDomain::Ontology)?;

        let tag = ontology_tag_of(expr.key())?;
        if let Some(existing) = self.expressions.first() {
            let existing_tag = ontology_tag_of(existing.key())?;
            if existing_tag != tag {
                return Err(QueryError::SingleOntologyTagOnly {
                    existing: existing_tag.to_owned(),
                    got: tag.to_owned(),
                });
            }
        }

        self.expressions.push(expr);
        Ok(self)
    }

    /// Bounds the middleware-ingest instant (`timestamp_ns`) of the ontology
    /// rows. Values travel as integer nanoseconds.
    pub fn with_message_timestamp<T: Ontology>(
        &mut self,
        time_start: Option<Time>,
        time_end: Option<Time>,
    ) -> Result<&mut Self, QueryError> {
        let key = format!("{}.timestamp_ns", T::TAG);
        let expr = range_expression(
            QueryDomain::Ontology,
            &key,
            time_start.map(|t| t.to_nanoseconds()),
            time_end.map(|t| t.to_nanoseconds()),
        )?;
        self.with_expression(expr)
    }

    /// Bounds the acquisition stamp carried by the payload header
    /// (`header.stamp`), expressed as split second/nanosecond components.
    pub fn with_data_timestamp<T: Ontology>(
        &mut self,
        time_start: Option<Time>,
        time_end: Option<Time>,
    ) -> Result<&mut Self, QueryError> {
        if let (Some(start), Some(end)) = (time_start, time_end)
            && start.to_nanoseconds() > end.to_nanoseconds()
        {
            return Err(QueryError::bad_value(
                &format!("{}.header.stamp", T::TAG),
                "'time_start' must be less than 'time_end'",
            ));
        }

        let sec = range_expression(
            QueryDomain::Ontology,
            &format!("{}.header.stamp.sec", T::TAG),
            time_start.map(|t| t.sec()),
            time_end.map(|t| t.sec()),
        )?;
        let nanosec = range_expression(
            QueryDomain::Ontology,
            &format!("{}.header.stamp.nanosec", T::TAG),
            time_start.map(|t| t.nanosec() as i64),
            time_end.map(|t| t.nanosec() as i64),
        )?;

        self.with_expression(sec)?.with_expression(nanosec)
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    pub fn to_value(&self) -> serde_json::Value {
        combine_expressions(&self.expressions)
    }
}

// ////////////////////////////////////////////////////////////////////////////
// TOPIC CATALOG
// ////////////////////////////////////////////////////////////////////////////

/// Query fragment over the topic catalog.
///
/// Emits a nested payload: flat platform fields next to dictionary fields
/// (e.g. `user_metadata`) whose expressions are nested with the prefix
/// stripped.
#[derive(Debug, Default, Clone)]
pub struct QueryTopic {
    expressions: Vec<Expression>,
}

impl QueryTopic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(&self) -> QueryDomain {
        QueryDomain::Topic
    }

    /// Adds an expression, rejecting wrong domains, malformed operators and
    /// duplicate key paths. A rejected expression leaves the builder
    /// untouched.
    pub fn with_expression(&mut self, expr: Expression) -> Result<&mut Self, QueryError> {
        validate_common(&self.expressions, &expr, QueryDomain::Topic)?;
        self.expressions.push(expr);
        Ok(self)
    }

    /// Substring filter on the packed topic resource name.
    pub fn with_name_match(&mut self, name: &str) -> Result<&mut Self, QueryError> {
        self.with_expression(Expression::new(
            QueryDomain::Topic,
            "name",
            "$match",
            serde_json::json!(name),
        ))
    }

    /// Exact filter on the ontology tag carried by the topic.
    pub fn with_ontology_tag(&mut self, ontology_tag: &str) -> Result<&mut Self, QueryError> {
        self.with_expression(Expression::new(
            QueryDomain::Topic,
            "ontology_tag",
            "$eq",
            serde_json::json!(ontology_tag),
        ))
    }

    /// Bounds the topic creation instant. Values travel as integer
    /// milliseconds.
    pub fn with_created_timestamp(
        &mut self,
        time_start: Option<Time>,
        time_end: Option<Time>,
    ) -> Result<&mut Self, QueryError> {
        let expr = range_expression(
            QueryDomain::Topic,
            "created_timestamp",
            time_start.map(|t| t.to_milliseconds()),
            time_end.map(|t| t.to_milliseconds()),
        )?;
        self.with_expression(expr)
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    pub fn to_value(&self) -> serde_json::Value {
        partition_to_value(&self.expressions, &catalog_dict_fields(QueryDomain::Topic))
    }
}

// ////////////////////////////////////////////////////////////////////////////
// SEQUENCE CATALOG
// ////////////////////////////////////////////////////////////////////////////

/// Query fragment over the sequence catalog, same emission rules as
/// [`QueryTopic`].
#[derive(Debug, Default, Clone)]
pub struct QuerySequence {
    expressions: Vec<Expression>,
}

impl QuerySequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(&self) -> QueryDomain {
        QueryDomain::Sequence
    }

    /// Adds an expression, rejecting wrong domains, malformed operators and
    /// duplicate key paths. A rejected expression leaves the builder
    /// untouched.
    pub fn with_expression(&mut self, expr: Expression) -> Result<&mut Self, QueryError> {
        validate_common(&self.expressions, &expr, QueryDomain::Sequence)?;
        self.expressions.push(expr);
        Ok(self)
    }

    /// Exact filter on the sequence name.
    pub fn with_name(&mut self, name: &str) -> Result<&mut Self, QueryError> {
        self.with_expression(Expression::new(
            QueryDomain::Sequence,
            "name",
            "$eq",
            serde_json::json!(name),
        ))
    }

    /// Substring filter on the sequence name.
    pub fn with_name_match(&mut self, name: &str) -> Result<&mut Self, QueryError> {
        self.with_expression(Expression::new(
            QueryDomain::Sequence,
            "name",
            "$match",
            serde_json::json!(name),
        ))
    }

    /// Bounds the sequence creation instant. Values travel as integer
    /// milliseconds.
    pub fn with_created_timestamp(
        &mut self,
        time_start: Option<Time>,
        time_end: Option<Time>,
    ) -> Result<&mut Self, QueryError> {
        let expr = range_expression(
            QueryDomain::Sequence,
            "created_timestamp",
            time_start.map(|t| t.to_milliseconds()),
            time_end.map(|t| t.to_milliseconds()),
        )?;
        self.with_expression(expr)
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    pub fn to_value(&self) -> serde_json::Value {
        partition_to_value(
            &self.expressions,
            &catalog_dict_fields(QueryDomain::Sequence),
        )
    }
}

// ////////////////////////////////////////////////////////////////////////////
// ROOT QUERY
// ////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
enum QueryPart {
    Sequence(QuerySequence),
    Topic(QueryTopic),
    Ontology(QueryOntologyCatalog),
}

impl QueryPart {
    fn domain(&self) -> QueryDomain {
        match self {
            QueryPart::Sequence(q) => q.domain(),
            QueryPart::Topic(q) => q.domain(),
            QueryPart::Ontology(q) => q.domain(),
        }
    }

    fn to_value(&self) -> serde_json::Value {
        match self {
            QueryPart::Sequence(q) => q.to_value(),
            QueryPart::Topic(q) => q.to_value(),
            QueryPart::Ontology(q) => q.to_value(),
        }
    }
}

/// The root query: at most one builder per domain, joined in AND by the
/// server.
#[derive(Debug, Default, Clone)]
pub struct Query {
    parts: Vec<QueryPart>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_part(mut self, part: QueryPart) -> Result<Self, QueryError> {
        if self.parts.iter().any(|existing| existing.domain() == part.domain()) {
            return Err(QueryError::DuplicateDomain(part.domain().name()));
        }
        self.parts.push(part);
        Ok(self)
    }

    pub fn with_sequence(self, query: QuerySequence) -> Result<Self, QueryError> {
        self.with_part(QueryPart::Sequence(query))
    }

    pub fn with_topic(self, query: QueryTopic) -> Result<Self, QueryError> {
        self.with_part(QueryPart::Topic(query))
    }

    pub fn with_ontology(self, query: QueryOntologyCatalog) -> Result<Self, QueryError> {
        self.with_part(QueryPart::Ontology(query))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The full wire payload: one entry per domain.
    pub fn to_value(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for part in &self.parts {
            root.insert(part.domain().name().to_owned(), part.to_value());
        }
        serde_json::Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ontology_proxy, topic_proxy};
    use arrow::datatypes::{DataType, Field, Fields};
    use mosaico_core::types::Format;
    use mosaico_model::{ModelError, Ontology, Row};

    struct Imu;

    impl Ontology for Imu {
        const TAG: &'static str = "imu";
        const FORMAT: Format = Format::Default;

        fn payload_fields() -> Fields {
            Fields::from(vec![Field::new(
                "acceleration",
                DataType::Struct(Fields::from(vec![
                    Field::new("x", DataType::Float64, false),
                    Field::new("y", DataType::Float64, false),
                    Field::new("z", DataType::Float64, false),
                ])),
                false,
            )])
        }

        fn encode_payload(&self, _out: &mut Row) {}

        fn decode_payload(_row: &Row) -> Result<Self, ModelError> {
            Ok(Self)
        }
    }

    struct Image;

    impl Ontology for Image {
        const TAG: &'static str = "image";
        const FORMAT: Format = Format::Image;

        fn payload_fields() -> Fields {
            Fields::from(vec![Field::new("format", DataType::Utf8, false)])
        }

        fn encode_payload(&self, _out: &mut Row) {}

        fn decode_payload(_row: &Row) -> Result<Self, ModelError> {
            Ok(Self)
        }
    }

    #[test]
    fn combined_topic_and_ontology_shape() {
        let mut topic = QueryTopic::new();
        topic
            .with_expression(
                topic_proxy()
                    .field("user_metadata")
                    .unwrap()
                    .key("serial")
                    .unwrap()
                    .eq("X")
                    .unwrap(),
            )
            .unwrap();

        let mut catalog = QueryOntologyCatalog::new();
        catalog
            .with_expression(
                ontology_proxy::<Imu>()
                    .field("acceleration")
                    .unwrap()
                    .field("x")
                    .unwrap()
                    .geq(0.5)
                    .unwrap(),
            )
            .unwrap();

        let query = Query::new()
            .with_topic(topic)
            .unwrap()
            .with_ontology(catalog)
            .unwrap();

        assert_eq!(
            query.to_value(),
            serde_json::json!({
                "topic": { "user_metadata": { "serial": { "$eq": "X" } } },
                "ontology": { "imu.acceleration.x": { "$geq": 0.5 } },
            })
        );
    }

    #[test]
    fn single_ontology_tag_rule() {
        let mut catalog = QueryOntologyCatalog::new();
        catalog
            .with_expression(
                ontology_proxy::<Imu>()
                    .field("acceleration")
                    .unwrap()
                    .field("x")
                    .unwrap()
                    .eq(0.0)
                    .unwrap(),
            )
            .unwrap();

        let err = catalog
            .with_expression(
                ontology_proxy::<Image>()
                    .field("format")
                    .unwrap()
                    .eq("png")
                    .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::SingleOntologyTagOnly { .. }));

        // The builder still holds only the first expression
        assert_eq!(catalog.expressions().len(), 1);
    }

    #[test]
    fn duplicate_key_preserves_builder_state() {
        let proxy = ontology_proxy::<Imu>();
        let accel_x = proxy.field("acceleration").unwrap().field("x").unwrap();

        let mut catalog = QueryOntologyCatalog::new();
        catalog.with_expression(accel_x.geq(0.5).unwrap()).unwrap();

        let before = catalog.expressions().to_vec();
        let err = catalog.with_expression(accel_x.lt(2.0).unwrap()).unwrap_err();
        assert!(matches!(err, QueryError::DuplicateKey(_)));
        assert_eq!(catalog.expressions(), before.as_slice());
    }

    #[test]
    fn operator_prefix_is_enforced() {
        let mut topic = QueryTopic::new();
        let err = topic
            .with_expression(Expression::new(
                QueryDomain::Topic,
                "name",
                "eq",
                serde_json::json!("x"),
            ))
            .unwrap_err();
        assert!(matches!(err, QueryError::BadOperatorFormat(_)));
    }

    #[test]
    fn domains_do_not_mix() {
        let mut sequence = QuerySequence::new();
        let err = sequence
            .with_expression(Expression::new(
                QueryDomain::Topic,
                "name",
                "$eq",
                serde_json::json!("x"),
            ))
            .unwrap_err();
        assert!(matches!(err, QueryError::DomainMismatch { .. }));
    }

    #[test]
    fn duplicate_domain_in_root_query() {
        let query = Query::new().with_topic(QueryTopic::new()).unwrap();
        let err = query.with_topic(QueryTopic::new()).unwrap_err();
        assert!(matches!(err, QueryError::DuplicateDomain("topic")));
    }

    #[test]
    fn sequence_helpers_shape() {
        let mut sequence = QuerySequence::new();
        sequence
            .with_name_match("drive")
            .unwrap()
            .with_created_timestamp(Some(Time::new(10, 500_000_000).unwrap()), None)
            .unwrap();

        assert_eq!(
            sequence.to_value(),
            serde_json::json!({
                "name": { "$match": "drive" },
                "created_timestamp": { "$geq": 10_500 },
            })
        );
    }

    #[test]
    fn created_timestamp_bounds_are_ordered() {
        let mut topic = QueryTopic::new();
        let err = topic
            .with_created_timestamp(
                Some(Time::new(20, 0).unwrap()),
                Some(Time::new(10, 0).unwrap()),
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::BadValue { .. }));

        let mut topic = QueryTopic::new();
        topic
            .with_created_timestamp(
                Some(Time::new(10, 0).unwrap()),
                Some(Time::new(20, 0).unwrap()),
            )
            .unwrap();
        assert_eq!(
            topic.to_value(),
            serde_json::json!({
                "created_timestamp": { "$between": [10_000, 20_000] },
            })
        );
    }

    #[test]
    fn message_timestamp_helper_uses_nanoseconds() {
        let mut catalog = QueryOntologyCatalog::new();
        catalog
            .with_message_timestamp::<Imu>(
                Some(Time::new(1, 0).unwrap()),
                Some(Time::new(2, 0).unwrap()),
            )
            .unwrap();

        assert_eq!(
            catalog.to_value(),
            serde_json::json!({
                "imu.timestamp_ns": { "$between": [1_000_000_000_i64, 2_000_000_000_i64] },
            })
        );
    }

    #[test]
    fn data_timestamp_helper_splits_components() {
        let mut catalog = QueryOntologyCatalog::new();
        catalog
            .with_data_timestamp::<Imu>(Some(Time::new(5, 100).unwrap()), None)
            .unwrap();

        assert_eq!(
            catalog.to_value(),
            serde_json::json!({
                "imu.header.stamp.sec": { "$geq": 5 },
                "imu.header.stamp.nanosec": { "$geq": 100 },
            })
        );
    }
}
