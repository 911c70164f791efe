use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use serde_dynamo::to_attribute_value;
use std::collections::HashMap;

use crate::error::Error;

/// Convert any serializable value into an attribute value
pub fn attribute_value<V: Serialize>(value: V) -> Result<AttributeValue, Error> {
    Ok(to_attribute_value(value)?)
}

/// A comparison against a single attribute
///
/// Key conditions accept `Eq`, `Lt`, `Le`, `Gt`, `Ge`, `BeginsWith` and
/// `Between`; filters accept every operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `attr = v`
    Eq(AttributeValue),
    /// `attr <> v`
    Ne(AttributeValue),
    /// `attr < v`
    Lt(AttributeValue),
    /// `attr <= v`
    Le(AttributeValue),
    /// `attr > v`
    Gt(AttributeValue),
    /// `attr >= v`
    Ge(AttributeValue),
    /// `begins_with(attr, v)`
    BeginsWith(AttributeValue),
    /// `attr BETWEEN lo AND hi`
    Between(AttributeValue, AttributeValue),
    /// `attr IN (v1, v2, ...)`
    In(Vec<AttributeValue>),
    /// `contains(attr, v)`
    Contains(AttributeValue),
    /// `NOT contains(attr, v)`
    NotContains(AttributeValue),
    /// `attribute_exists(attr)`
    NotNull,
    /// `attribute_not_exists(attr)`
    Null,
}

impl Condition {
    /// Whether DynamoDB accepts this operator in a key condition
    pub fn is_key_condition(&self) -> bool {
        matches!(
            self,
            Condition::Eq(_)
                | Condition::Lt(_)
                | Condition::Le(_)
                | Condition::Gt(_)
                | Condition::Ge(_)
                | Condition::BeginsWith(_)
                | Condition::Between(_, _)
        )
    }

    /// Operator name as used by the legacy `ComparisonOperator` enum
    pub fn operator(&self) -> &'static str {
        match self {
            Condition::Eq(_) => "EQ",
            Condition::Ne(_) => "NE",
            Condition::Lt(_) => "LT",
            Condition::Le(_) => "LE",
            Condition::Gt(_) => "GT",
            Condition::Ge(_) => "GE",
            Condition::BeginsWith(_) => "BEGINS_WITH",
            Condition::Between(_, _) => "BETWEEN",
            Condition::In(_) => "IN",
            Condition::Contains(_) => "CONTAINS",
            Condition::NotContains(_) => "NOT_CONTAINS",
            Condition::NotNull => "NOT_NULL",
            Condition::Null => "NULL",
        }
    }

    pub(crate) fn render(
        &self,
        attribute: &str,
        expression: &mut ExpressionBuilder,
    ) -> Result<String, Error> {
        if matches!(self, Condition::In(values) if values.is_empty()) {
            return Err(Error::InvalidQuery(format!(
                "IN condition on {attribute} needs at least one value"
            )));
        }

        let name = expression.name(attribute);

        let rendered = match self {
            Condition::Eq(v) => format!("{name} = {}", expression.value(v.clone())),
            Condition::Ne(v) => format!("{name} <> {}", expression.value(v.clone())),
            Condition::Lt(v) => format!("{name} < {}", expression.value(v.clone())),
            Condition::Le(v) => format!("{name} <= {}", expression.value(v.clone())),
            Condition::Gt(v) => format!("{name} > {}", expression.value(v.clone())),
            Condition::Ge(v) => format!("{name} >= {}", expression.value(v.clone())),
            Condition::BeginsWith(v) => {
                format!("begins_with({name}, {})", expression.value(v.clone()))
            }
            Condition::Between(lo, hi) => {
                let lo = expression.value(lo.clone());
                let hi = expression.value(hi.clone());
                format!("{name} BETWEEN {lo} AND {hi}")
            }
            Condition::In(values) => {
                let values: Vec<String> = values
                    .iter()
                    .map(|v| expression.value(v.clone()))
                    .collect();
                format!("{name} IN ({})", values.join(", "))
            }
            Condition::Contains(v) => format!("contains({name}, {})", expression.value(v.clone())),
            Condition::NotContains(v) => {
                format!("NOT contains({name}, {})", expression.value(v.clone()))
            }
            Condition::NotNull => format!("attribute_exists({name})"),
            Condition::Null => format!("attribute_not_exists({name})"),
        };

        Ok(rendered)
    }
}

/// How the conditions of a filter map are joined
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConditionalOperator {
    /// Every condition must hold
    #[default]
    And,
    /// Any condition may hold
    Or,
}

impl ConditionalOperator {
    fn keyword(self) -> &'static str {
        match self {
            ConditionalOperator::And => " AND ",
            ConditionalOperator::Or => " OR ",
        }
    }
}

/// Allocates `#attrN` / `:valN` placeholders shared by every expression of one request
#[derive(Debug, Default)]
pub(crate) struct ExpressionBuilder {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    name_by_attribute: HashMap<String, String>,
    next_value: usize,
}

impl ExpressionBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Placeholder for an attribute name; the same attribute reuses its placeholder
    pub(crate) fn name(&mut self, attribute: &str) -> String {
        if let Some(placeholder) = self.name_by_attribute.get(attribute) {
            return placeholder.clone();
        }

        let placeholder = format!("#attr{}", self.name_by_attribute.len());
        let _ = self
            .name_by_attribute
            .insert(attribute.to_string(), placeholder.clone());
        let _ = self
            .names
            .insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    /// Placeholder for a value
    pub(crate) fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":val{}", self.next_value);
        self.next_value += 1;
        let _ = self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Render a map of conditions joined by `operator`
    pub(crate) fn conditions<'a, I>(
        &mut self,
        conditions: I,
        operator: ConditionalOperator,
    ) -> Result<Option<String>, Error>
    where
        I: IntoIterator<Item = (&'a String, &'a Condition)>,
    {
        let rendered = conditions
            .into_iter()
            .map(|(attribute, condition)| condition.render(attribute, self))
            .collect::<Result<Vec<String>, Error>>()?;

        Ok(match rendered.len() {
            0 => None,
            1 => rendered.into_iter().next(),
            _ => Some(
                rendered
                    .iter()
                    .map(|c| format!("({c})"))
                    .collect::<Vec<_>>()
                    .join(operator.keyword()),
            ),
        })
    }

    /// Merge caller supplied placeholders; a clash with a generated or earlier one is an error
    pub(crate) fn merge_user(
        &mut self,
        names: &HashMap<String, String>,
        values: &HashMap<String, AttributeValue>,
    ) -> Result<(), Error> {
        for (placeholder, attribute) in names {
            if let Some(existing) = self.names.get(placeholder) {
                if existing != attribute {
                    return Err(Error::InvalidQuery(format!(
                        "expression attribute name {placeholder} is bound to both {existing} and {attribute}"
                    )));
                }
            }
            let _ = self.names.insert(placeholder.clone(), attribute.clone());
        }

        for (placeholder, value) in values {
            if self.values.contains_key(placeholder) {
                return Err(Error::InvalidQuery(format!(
                    "expression attribute value {placeholder} is defined twice"
                )));
            }
            let _ = self.values.insert(placeholder.clone(), value.clone());
        }

        Ok(())
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Option<HashMap<String, String>>,
        Option<HashMap<String, AttributeValue>>,
    ) {
        let names = (!self.names.is_empty()).then_some(self.names);
        let values = (!self.values.is_empty()).then_some(self.values);
        (names, values)
    }
}

/// Join two optional expressions with AND
pub(crate) fn and_expressions(left: Option<String>, right: Option<String>) -> Option<String> {
    match (left, right) {
        (Some(l), Some(r)) => Some(format!("({l}) AND ({r})")),
        (l, r) => l.or(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_string())
    }

    #[test]
    fn test_render_key_operators() {
        let mut builder = ExpressionBuilder::new();

        assert_eq!(Condition::Eq(s("a")).render("pk", &mut builder).unwrap(), "#attr0 = :val0");
        assert_eq!(
            Condition::BeginsWith(s("2024")).render("sk", &mut builder).unwrap(),
            "begins_with(#attr1, :val1)"
        );
        assert_eq!(
            Condition::Between(s("a"), s("m")).render("sk", &mut builder).unwrap(),
            "#attr1 BETWEEN :val2 AND :val3"
        );

        let (names, values) = builder.into_parts();
        let names = names.unwrap();
        assert_eq!(names["#attr0"], "pk");
        assert_eq!(names["#attr1"], "sk");
        assert_eq!(values.unwrap().len(), 4);
    }

    #[test]
    fn test_render_filter_operators() {
        let mut builder = ExpressionBuilder::new();

        assert_eq!(
            Condition::In(vec![s("a"), s("b")]).render("status", &mut builder).unwrap(),
            "#attr0 IN (:val0, :val1)"
        );
        assert_eq!(Condition::Null.render("deleted", &mut builder).unwrap(), "attribute_not_exists(#attr1)");
        assert_eq!(Condition::NotNull.render("deleted", &mut builder).unwrap(), "attribute_exists(#attr1)");
        assert_eq!(
            Condition::NotContains(s("x")).render("tags", &mut builder).unwrap(),
            "NOT contains(#attr2, :val2)"
        );
    }

    #[test]
    fn test_key_condition_operators() {
        assert!(Condition::Ge(s("a")).is_key_condition());
        assert!(Condition::Between(s("a"), s("b")).is_key_condition());
        assert!(!Condition::Ne(s("a")).is_key_condition());
        assert!(!Condition::Contains(s("a")).is_key_condition());
        assert!(!Condition::Null.is_key_condition());
        assert_eq!(Condition::NotNull.operator(), "NOT_NULL");
    }

    #[test]
    fn test_conditions_joined() {
        let mut filter = BTreeMap::new();
        let _ = filter.insert("a".to_string(), Condition::Eq(s("1")));
        let _ = filter.insert("b".to_string(), Condition::Gt(AttributeValue::N("2".into())));

        let mut builder = ExpressionBuilder::new();
        let rendered = builder.conditions(&filter, ConditionalOperator::Or).unwrap().unwrap();
        assert_eq!(rendered, "(#attr0 = :val0) OR (#attr1 > :val1)");

        let mut builder = ExpressionBuilder::new();
        assert!(builder
            .conditions(&BTreeMap::new(), ConditionalOperator::And)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_empty_in_is_rejected() {
        let mut builder = ExpressionBuilder::new();
        let err = Condition::In(Vec::new()).render("status", &mut builder).unwrap_err();
        assert!(err.is_invalid_query());

        let mut filter = BTreeMap::new();
        let _ = filter.insert("a".to_string(), Condition::Eq(s("1")));
        let _ = filter.insert("status".to_string(), Condition::In(Vec::new()));

        let mut builder = ExpressionBuilder::new();
        let err = builder.conditions(&filter, ConditionalOperator::And).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(message) if message.contains("status")));
    }

    #[test]
    fn test_merge_user_placeholders() {
        let mut builder = ExpressionBuilder::new();
        let _ = builder.name("status");
        let _ = builder.value(s("x"));

        let mut names = HashMap::new();
        let _ = names.insert("#s".to_string(), "size".to_string());
        let mut values = HashMap::new();
        let _ = values.insert(":min".to_string(), AttributeValue::N("3".into()));
        builder.merge_user(&names, &values).unwrap();

        let mut clash = HashMap::new();
        let _ = clash.insert(":val0".to_string(), s("y"));
        let err = builder.merge_user(&HashMap::new(), &clash).unwrap_err();
        assert!(err.is_invalid_query());

        let mut rebound = HashMap::new();
        let _ = rebound.insert("#attr0".to_string(), "other".to_string());
        assert!(builder.merge_user(&rebound, &HashMap::new()).is_err());
    }

    #[test]
    fn test_and_expressions() {
        assert_eq!(and_expressions(None, None), None);
        assert_eq!(and_expressions(Some("a".into()), None), Some("a".into()));
        assert_eq!(
            and_expressions(Some("a".into()), Some("b".into())),
            Some("(a) AND (b)".into())
        );
    }

    #[test]
    fn test_attribute_value_conversion() {
        assert_eq!(attribute_value("x").unwrap(), s("x"));
        assert_eq!(attribute_value(42u32).unwrap(), AttributeValue::N("42".into()));
    }
}
