/// The domain a key path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryDomain {
    /// The data catalog of one ontology, keyed by dotted paths rooted at the
    /// ontology tag (e.g. `imu.acceleration.x`).
    Ontology,
    /// The topic catalog (names, formats, user metadata).
    Topic,
    /// The sequence catalog.
    Sequence,
}

impl QueryDomain {
    /// The top-level key of this domain in the root query payload.
    pub fn name(&self) -> &'static str {
        match self {
            QueryDomain::Ontology => "ontology",
            QueryDomain::Topic => "topic",
            QueryDomain::Sequence => "sequence",
        }
    }
}

impl std::fmt::Display for QueryDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single atomic comparison: `(key path, operator, value)`.
///
/// Expressions are normally emitted by the field proxies, which validate the
/// operator and the value type. Direct composition stays available for the
/// special platform fields the builders' helper methods target.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    domain: QueryDomain,
    key: String,
    op: String,
    value: serde_json::Value,
}

impl Expression {
    pub fn new(
        domain: QueryDomain,
        key: impl Into<String>,
        op: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            domain,
            key: key.into(),
            op: op.into(),
            value,
        }
    }

    pub fn domain(&self) -> QueryDomain {
        self.domain
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Rebuilds the expression under a different key path. Used by the
    /// builders when nesting dictionary expressions under their field.
    pub(crate) fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            domain: self.domain,
            key: key.into(),
            op: self.op.clone(),
            value: self.value.clone(),
        }
    }

    /// The dictionary form of this comparison: `{ key: { op: value } }`.
    pub fn to_value(&self) -> serde_json::Value {
        let mut comparison = serde_json::Map::new();
        comparison.insert(self.op.clone(), self.value.clone());

        let mut keyed = serde_json::Map::new();
        keyed.insert(self.key.clone(), serde_json::Value::Object(comparison));
        serde_json::Value::Object(keyed)
    }
}

/// Merges expressions into a single flat map, an implicit logical AND.
pub(crate) fn combine_expressions(expressions: &[Expression]) -> serde_json::Value {
    let mut combined = serde_json::Map::new();
    for expr in expressions {
        let mut comparison = serde_json::Map::new();
        comparison.insert(expr.op.clone(), expr.value.clone());
        combined.insert(expr.key.clone(), serde_json::Value::Object(comparison));
    }
    serde_json::Value::Object(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_to_value() {
        let expr = Expression::new(
            QueryDomain::Ontology,
            "gps.satellites",
            "$leq",
            serde_json::json!(10),
        );
        assert_eq!(
            expr.to_value(),
            serde_json::json!({"gps.satellites": {"$leq": 10}})
        );
    }

    #[test]
    fn combination_is_an_implicit_and() {
        let exprs = vec![
            Expression::new(QueryDomain::Topic, "name", "$match", serde_json::json!("cam")),
            Expression::new(
                QueryDomain::Topic,
                "ontology_tag",
                "$eq",
                serde_json::json!("imu"),
            ),
        ];
        assert_eq!(
            combine_expressions(&exprs),
            serde_json::json!({
                "name": {"$match": "cam"},
                "ontology_tag": {"$eq": "imu"},
            })
        );
    }
}
