use crate::{Expression, QueryDomain, QueryError};
use arrow::datatypes::{DataType, Fields};
use mosaico_model::{Ontology, envelope_fields};

/// Queryable shape of one schema node, derived from its column type.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Integer widths and floats, full comparison operator set.
    Numeric,
    /// Equality only.
    Bool,
    /// Equality, inequality, `match` and membership.
    Str,
    /// Comparable like numerics, values are normalized to ISO-8601 or
    /// decimal nanosecond strings before hitting the wire.
    DateTime,
    /// A dictionary field (e.g. `user_metadata`): indexed access only.
    Dict,
    /// A value inside a dictionary field, dynamically typed.
    Dynamic,
    /// An interior node, descended into by name.
    Struct(Vec<FieldSpec>),
    /// Lists and anything else without query support.
    Unsupported,
}

/// A named schema node.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

fn kind_of(datatype: &DataType) -> FieldKind {
    match datatype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float16
        | DataType::Float32
        | DataType::Float64 => FieldKind::Numeric,
        DataType::Boolean => FieldKind::Bool,
        DataType::Utf8 | DataType::LargeUtf8 => FieldKind::Str,
        DataType::Date32
        | DataType::Date64
        | DataType::Time32(_)
        | DataType::Time64(_)
        | DataType::Timestamp(_, _) => FieldKind::DateTime,
        DataType::Struct(children) => FieldKind::Struct(fields_to_specs(children)),
        DataType::Map(_, _) => FieldKind::Dict,
        _ => FieldKind::Unsupported,
    }
}

/// Walks Arrow fields depth-first into a proxy field-spec tree.
pub fn fields_to_specs(fields: &Fields) -> Vec<FieldSpec> {
    fields
        .iter()
        .map(|field| FieldSpec::new(field.name().clone(), kind_of(field.data_type())))
        .collect()
}

/// The query proxy of an ontology: the message envelope columns prepended to
/// the payload columns, rooted at the ontology tag.
pub fn ontology_proxy<T: Ontology>() -> QueryField {
    let mut specs = fields_to_specs(&envelope_fields());
    specs.extend(fields_to_specs(&T::payload_fields()));
    QueryField {
        domain: QueryDomain::Ontology,
        path: T::TAG.to_owned(),
        kind: FieldKind::Struct(specs),
    }
}

fn catalog_proxy(domain: QueryDomain) -> QueryField {
    // The catalog entities expose only their user metadata to the proxy,
    // the remaining platform fields are reachable through the builders'
    // helper methods.
    QueryField {
        domain,
        path: String::new(),
        kind: FieldKind::Struct(vec![FieldSpec::new("user_metadata", FieldKind::Dict)]),
    }
}

/// The query proxy of the sequence catalog.
pub fn sequence_proxy() -> QueryField {
    catalog_proxy(QueryDomain::Sequence)
}

/// The query proxy of the topic catalog.
pub fn topic_proxy() -> QueryField {
    catalog_proxy(QueryDomain::Topic)
}

/// Names of the dictionary-typed fields of a catalog domain, used by the
/// builders to nest their expressions.
pub(crate) fn catalog_dict_fields(domain: QueryDomain) -> Vec<String> {
    let QueryField { kind, .. } = catalog_proxy(domain);
    match kind {
        FieldKind::Struct(children) => children
            .into_iter()
            .filter(|child| matches!(child.kind, FieldKind::Dict))
            .map(|child| child.name)
            .collect(),
        _ => Vec::new(),
    }
}

// ////////////////////////////////////////////////////////////////////////////
// VALUES
// ////////////////////////////////////////////////////////////////////////////

/// A value usable on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl QueryValue {
    fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Int(_) => "int",
            QueryValue::Float(_) => "float",
            QueryValue::Bool(_) => "bool",
            QueryValue::Str(_) => "string",
            QueryValue::DateTime(_) => "datetime",
        }
    }

    fn same_type(&self, other: &QueryValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn le(&self, other: &QueryValue) -> bool {
        match (self, other) {
            (QueryValue::Int(a), QueryValue::Int(b)) => a <= b,
            (QueryValue::Float(a), QueryValue::Float(b)) => a <= b,
            (QueryValue::Bool(a), QueryValue::Bool(b)) => a <= b,
            (QueryValue::Str(a), QueryValue::Str(b)) => a <= b,
            (QueryValue::DateTime(a), QueryValue::DateTime(b)) => a <= b,
            _ => true,
        }
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::Int(v as i64)
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Int(v)
    }
}

impl From<u32> for QueryValue {
    fn from(v: u32) -> Self {
        QueryValue::Int(v as i64)
    }
}

impl From<f32> for QueryValue {
    fn from(v: f32) -> Self {
        QueryValue::Float(v as f64)
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::Float(v)
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::Bool(v)
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Str(v.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Str(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for QueryValue {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        QueryValue::DateTime(v)
    }
}

// ////////////////////////////////////////////////////////////////////////////
// FIELD PROXY
// ////////////////////////////////////////////////////////////////////////////

const OPS_COMPARABLE: &[&str] = &["between", "eq", "geq", "gt", "in", "leq", "lt", "neq"];
const OPS_STRING: &[&str] = &["eq", "in", "matches", "neq"];
const OPS_BOOL: &[&str] = &["eq"];
const OPS_DYNAMIC: &[&str] = &["between", "eq", "geq", "gt", "leq", "lt"];
const OPS_NONE: &[&str] = &[];

/// One node of the query proxy tree: an interior struct, a dictionary, or a
/// typed leaf whose operator methods emit validated [`Expression`]s.
#[derive(Debug, Clone)]
pub struct QueryField {
    domain: QueryDomain,
    path: String,
    kind: FieldKind,
}

impl QueryField {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn domain(&self) -> QueryDomain {
        self.domain
    }

    /// Descends into a named child of an interior node.
    pub fn field(&self, name: &str) -> Result<QueryField, QueryError> {
        match &self.kind {
            FieldKind::Struct(children) => {
                let child = children.iter().find(|child| child.name == name).ok_or_else(|| {
                    QueryError::InvalidField {
                        path: self.path.clone(),
                        name: name.to_owned(),
                        available: self.available_fields(),
                    }
                })?;

                Ok(QueryField {
                    domain: self.domain,
                    path: self.child_path(name),
                    kind: child.kind.clone(),
                })
            }
            FieldKind::Dict => Err(QueryError::DictAccess {
                path: self.path.clone(),
                name: name.to_owned(),
            }),
            _ => Err(QueryError::InvalidField {
                path: self.path.clone(),
                name: name.to_owned(),
                available: Vec::new(),
            }),
        }
    }

    /// Indexed access into a dictionary field, yielding a dynamically typed
    /// leaf whose path nests the key under the dictionary.
    pub fn key(&self, key: &str) -> Result<QueryField, QueryError> {
        match self.kind {
            FieldKind::Dict => Ok(QueryField {
                domain: self.domain,
                path: self.child_path(key),
                kind: FieldKind::Dynamic,
            }),
            _ => Err(QueryError::IndexAccess {
                path: self.path.clone(),
            }),
        }
    }

    /// The queryable children of an interior node.
    pub fn available_fields(&self) -> Vec<String> {
        match &self.kind {
            FieldKind::Struct(children) => children
                .iter()
                .filter(|child| !matches!(child.kind, FieldKind::Unsupported))
                .map(|child| child.name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The operators this leaf supports.
    pub fn available_operators(&self) -> &'static [&'static str] {
        match &self.kind {
            FieldKind::Numeric | FieldKind::DateTime => OPS_COMPARABLE,
            FieldKind::Str => OPS_STRING,
            FieldKind::Bool => OPS_BOOL,
            FieldKind::Dynamic => OPS_DYNAMIC,
            FieldKind::Dict | FieldKind::Struct(_) | FieldKind::Unsupported => OPS_NONE,
        }
    }

    // --- Operators ---

    pub fn eq(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("eq", "$eq", value.into())
    }

    pub fn neq(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("neq", "$neq", value.into())
    }

    pub fn lt(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("lt", "$lt", value.into())
    }

    pub fn leq(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("leq", "$leq", value.into())
    }

    pub fn gt(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("gt", "$gt", value.into())
    }

    pub fn geq(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("geq", "$geq", value.into())
    }

    /// Substring match on string fields (`%value%` on the server side).
    pub fn matches(&self, value: impl Into<QueryValue>) -> Result<Expression, QueryError> {
        self.compare("matches", "$match", value.into())
    }

    /// Membership test: at least one value, all of the same type.
    pub fn is_in<V: Into<QueryValue>>(
        &self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Expression, QueryError> {
        self.ensure_operator("in")?;

        let values: Vec<QueryValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(QueryError::bad_value(
                &self.path,
                "the 'in' operator requires at least one value",
            ));
        }
        self.ensure_same_type(&values)?;
        for value in &values {
            self.ensure_value("in", value)?;
        }

        let transformed: Vec<serde_json::Value> =
            values.iter().map(|value| self.transform(value)).collect();
        Ok(Expression::new(
            self.domain,
            &self.path,
            "$in",
            serde_json::Value::Array(transformed),
        ))
    }

    /// Inclusive range test: exactly two values of the same comparable type,
    /// with the first not greater than the second.
    pub fn between(
        &self,
        low: impl Into<QueryValue>,
        high: impl Into<QueryValue>,
    ) -> Result<Expression, QueryError> {
        self.ensure_operator("between")?;

        let low = low.into();
        let high = high.into();
        self.ensure_value("between", &low)?;
        if !low.same_type(&high) {
            return Err(QueryError::bad_value(
                &self.path,
                format!(
                    "all values must be of the same type, got {} and {}",
                    low.type_name(),
                    high.type_name()
                ),
            ));
        }
        if !low.le(&high) {
            return Err(QueryError::bad_value(
                &self.path,
                "the 'between' operator expects the first value less than (or equal to) the second",
            ));
        }

        Ok(Expression::new(
            self.domain,
            &self.path,
            "$between",
            serde_json::Value::Array(vec![self.transform(&low), self.transform(&high)]),
        ))
    }

    // --- Internals ---

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.path, name)
        }
    }

    fn compare(
        &self,
        op: &'static str,
        wire_op: &'static str,
        value: QueryValue,
    ) -> Result<Expression, QueryError> {
        self.ensure_operator(op)?;
        self.ensure_value(op, &value)?;
        Ok(Expression::new(
            self.domain,
            &self.path,
            wire_op,
            self.transform(&value),
        ))
    }

    fn ensure_operator(&self, op: &'static str) -> Result<(), QueryError> {
        let available = self.available_operators();
        if !available.contains(&op) {
            return Err(QueryError::InvalidOperator {
                path: self.path.clone(),
                op,
                available,
            });
        }
        Ok(())
    }

    fn ensure_same_type(&self, values: &[QueryValue]) -> Result<(), QueryError> {
        if let Some((first, rest)) = values.split_first()
            && let Some(odd) = rest.iter().find(|value| !value.same_type(first))
        {
            return Err(QueryError::bad_value(
                &self.path,
                format!(
                    "all values must be of the same type, got {} and {}",
                    first.type_name(),
                    odd.type_name()
                ),
            ));
        }
        Ok(())
    }

    fn ensure_value(&self, op: &str, value: &QueryValue) -> Result<(), QueryError> {
        let accepted = match &self.kind {
            FieldKind::Numeric => matches!(value, QueryValue::Int(_) | QueryValue::Float(_)),
            FieldKind::DateTime => matches!(value, QueryValue::DateTime(_) | QueryValue::Int(_)),
            FieldKind::Str => matches!(value, QueryValue::Str(_)),
            FieldKind::Bool => matches!(value, QueryValue::Bool(_)),
            FieldKind::Dynamic => match op {
                "eq" => matches!(
                    value,
                    QueryValue::Int(_)
                        | QueryValue::Float(_)
                        | QueryValue::Str(_)
                        | QueryValue::Bool(_)
                ),
                // The range check only enforces that both bounds share a type
                "between" => true,
                _ => matches!(value, QueryValue::Int(_) | QueryValue::Float(_)),
            },
            FieldKind::Dict | FieldKind::Struct(_) | FieldKind::Unsupported => false,
        };

        if !accepted {
            return Err(QueryError::bad_value(
                &self.path,
                format!("invalid {} value for this field", value.type_name()),
            ));
        }
        Ok(())
    }

    /// Serializes a validated value. Datetime leaves normalize their inputs:
    /// instants to ISO-8601, integers to decimal nanosecond strings.
    fn transform(&self, value: &QueryValue) -> serde_json::Value {
        if matches!(self.kind, FieldKind::DateTime) {
            return match value {
                QueryValue::DateTime(dt) => {
                    serde_json::Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
                }
                QueryValue::Int(ns) => serde_json::Value::String(ns.to_string()),
                other => raw_json(other),
            };
        }
        raw_json(value)
    }
}

fn raw_json(value: &QueryValue) -> serde_json::Value {
    match value {
        QueryValue::Int(v) => serde_json::json!(v),
        QueryValue::Float(v) => serde_json::json!(v),
        QueryValue::Bool(v) => serde_json::json!(v),
        QueryValue::Str(v) => serde_json::json!(v),
        QueryValue::DateTime(v) => {
            serde_json::Value::String(v.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
        }
    }
}
