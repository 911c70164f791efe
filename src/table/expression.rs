use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use serde_dynamo::to_item;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use crate::error::Error;
use crate::table::condition::{Condition, ConditionalOperator, attribute_value};
use crate::table::types::Item;
use crate::table::DynamoTable;

/// Caller supplied filter expression plus its placeholders
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct RawExpression {
    pub(crate) expression: Option<String>,
    pub(crate) names: HashMap<String, String>,
    pub(crate) values: HashMap<String, AttributeValue>,
}

/// Query for items of `T`
///
/// The hash key is taken from any serializable key object: every non-null
/// attribute that is the table hash key or a global index hash key is a
/// candidate, and the index to query is inferred from the candidates and the
/// range key condition.
///
/// ```
/// use dynamo_mapper::{Condition, DynamoTable, QueryExpression};
/// use aws_sdk_dynamodb::types::AttributeValue;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Serialize, Deserialize)]
/// # struct Order { user_id: String, order_id: String }
/// # impl DynamoTable for Order {
/// #     type PK = String;
/// #     type SK = String;
/// #     const TABLE: &'static str = "orders";
/// #     const PARTITION_KEY: &'static str = "user_id";
/// #     const SORT_KEY: Option<&'static str> = Some("order_id");
/// #     fn partition_key(&self) -> String { self.user_id.clone() }
/// # }
///
/// # fn example() -> Result<(), dynamo_mapper::Error> {
/// let expression = QueryExpression::<Order>::for_partition_key(&"user123".to_string())?
///     .with_range_key_condition("order_id", Condition::BeginsWith(AttributeValue::S("2024-".into())))
///     .with_scan_index_forward(false)
///     .with_limit(20);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct QueryExpression<T> {
    pub(crate) hash_key_values: Item,
    pub(crate) range_key_conditions: BTreeMap<String, Condition>,
    pub(crate) index_name: Option<String>,
    pub(crate) query_filter: BTreeMap<String, Condition>,
    pub(crate) conditional_operator: ConditionalOperator,
    pub(crate) raw: RawExpression,
    pub(crate) scan_index_forward: bool,
    pub(crate) consistent_read: Option<bool>,
    pub(crate) limit: Option<i32>,
    pub(crate) exclusive_start_key: Option<Item>,
    pub(crate) projection_expression: Option<String>,
    _table: PhantomData<fn() -> T>,
}

impl<T> Default for QueryExpression<T> {
    fn default() -> Self {
        Self {
            hash_key_values: Item::new(),
            range_key_conditions: BTreeMap::new(),
            index_name: None,
            query_filter: BTreeMap::new(),
            conditional_operator: ConditionalOperator::And,
            raw: RawExpression::default(),
            scan_index_forward: true,
            consistent_read: None,
            limit: None,
            exclusive_start_key: None,
            projection_expression: None,
            _table: PhantomData,
        }
    }
}

impl<T> QueryExpression<T> {
    /// Empty expression; a hash key must be added before it can run
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the hash key values from a key object (a record, a map, a `json!` value...)
    ///
    /// Null attributes are dropped, so `Option` fields left as `None` do not
    /// take part in index inference.
    pub fn with_hash_key_values<K: Serialize>(mut self, key_object: &K) -> Result<Self, Error> {
        let values: Item = to_item(key_object)?;
        self.hash_key_values = values
            .into_iter()
            .filter(|(_, value)| !matches!(value, AttributeValue::Null(_)))
            .collect();
        Ok(self)
    }

    /// Add one hash key value
    pub fn with_hash_key(mut self, attribute: impl Into<String>, value: AttributeValue) -> Self {
        let _ = self.hash_key_values.insert(attribute.into(), value);
        self
    }

    /// Add a range key condition
    pub fn with_range_key_condition(
        mut self,
        attribute: impl Into<String>,
        condition: Condition,
    ) -> Self {
        let _ = self.range_key_conditions.insert(attribute.into(), condition);
        self
    }

    /// Query this index instead of letting the mapper infer it
    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Add a filter condition on a non-key attribute
    pub fn with_query_filter_entry(
        mut self,
        attribute: impl Into<String>,
        condition: Condition,
    ) -> Self {
        let _ = self.query_filter.insert(attribute.into(), condition);
        self
    }

    /// How query filter conditions are joined
    pub fn with_conditional_operator(mut self, operator: ConditionalOperator) -> Self {
        self.conditional_operator = operator;
        self
    }

    /// Raw filter expression; combined with the query filter using AND
    pub fn with_filter_expression(mut self, expression: impl Into<String>) -> Self {
        self.raw.expression = Some(expression.into());
        self
    }

    /// Placeholder for an attribute name used in the raw filter expression
    pub fn with_expression_attribute_name(
        mut self,
        placeholder: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        let _ = self.raw.names.insert(placeholder.into(), attribute.into());
        self
    }

    /// Placeholder values used in the raw filter expression, from any serializable map or struct
    pub fn with_expression_attribute_values<U: Serialize>(mut self, values: U) -> Result<Self, Error> {
        let values: Item = to_item(values)?;
        self.raw.values.extend(values);
        Ok(self)
    }

    /// Descending sort order when `false`
    pub fn with_scan_index_forward(mut self, forward: bool) -> Self {
        self.scan_index_forward = forward;
        self
    }

    /// Override the mapper's read consistency
    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = Some(consistent_read);
        self
    }

    /// Page size
    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume after this key
    pub fn with_exclusive_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    /// Only fetch these attributes
    pub fn with_projection_expression(mut self, projection: impl Into<String>) -> Self {
        self.projection_expression = Some(projection.into());
        self
    }
}

impl<T: DynamoTable> QueryExpression<T> {
    /// Query the base table by partition key
    pub fn for_partition_key(partition_key: &T::PK) -> Result<Self, Error> {
        Ok(Self::new().with_hash_key(T::PARTITION_KEY, attribute_value(partition_key)?))
    }
}

/// Scan over every item of a table or index
#[derive(Clone, Debug, Default)]
pub struct ScanExpression {
    pub(crate) scan_filter: BTreeMap<String, Condition>,
    pub(crate) conditional_operator: ConditionalOperator,
    pub(crate) raw: RawExpression,
    pub(crate) limit: Option<i32>,
    pub(crate) exclusive_start_key: Option<Item>,
    pub(crate) segment: Option<i32>,
    pub(crate) total_segments: Option<i32>,
    pub(crate) index_name: Option<String>,
    pub(crate) consistent_read: Option<bool>,
    pub(crate) projection_expression: Option<String>,
}

impl ScanExpression {
    /// Scan of the whole table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter condition
    pub fn with_filter_condition(mut self, attribute: impl Into<String>, condition: Condition) -> Self {
        let _ = self.scan_filter.insert(attribute.into(), condition);
        self
    }

    /// How scan filter conditions are joined
    pub fn with_conditional_operator(mut self, operator: ConditionalOperator) -> Self {
        self.conditional_operator = operator;
        self
    }

    /// Raw filter expression; combined with the scan filter using AND
    pub fn with_filter_expression(mut self, expression: impl Into<String>) -> Self {
        self.raw.expression = Some(expression.into());
        self
    }

    /// Placeholder for an attribute name used in the raw filter expression
    pub fn with_expression_attribute_name(
        mut self,
        placeholder: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        let _ = self.raw.names.insert(placeholder.into(), attribute.into());
        self
    }

    /// Placeholder values used in the raw filter expression
    pub fn with_expression_attribute_values<U: Serialize>(mut self, values: U) -> Result<Self, Error> {
        let values: Item = to_item(values)?;
        self.raw.values.extend(values);
        Ok(self)
    }

    /// Page size
    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume after this key
    pub fn with_exclusive_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    /// Scan one segment of a parallel scan
    pub fn with_segment(mut self, segment: i32, total_segments: i32) -> Self {
        self.segment = Some(segment);
        self.total_segments = Some(total_segments);
        self
    }

    /// Scan a secondary index
    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Override the mapper's read consistency
    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = Some(consistent_read);
        self
    }

    /// Only fetch these attributes
    pub fn with_projection_expression(mut self, projection: impl Into<String>) -> Self {
        self.projection_expression = Some(projection.into());
        self
    }
}

/// Extra condition attached to a save
///
/// ```
/// use dynamo_mapper::SaveExpression;
///
/// let expression = SaveExpression::new()
///     .with_condition_expression("#s <> :closed")
///     .with_expression_attribute_name("#s", "status")
///     .with_expression_attribute_values(serde_json::json!({ ":closed": "closed" }))
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct SaveExpression {
    pub(crate) raw: RawExpression,
}

/// Extra condition attached to a delete
pub type DeleteExpression = SaveExpression;

impl SaveExpression {
    /// No extra condition
    pub fn new() -> Self {
        Self::default()
    }

    /// Condition expression that must hold for the write to happen
    pub fn with_condition_expression(mut self, expression: impl Into<String>) -> Self {
        self.raw.expression = Some(expression.into());
        self
    }

    /// Placeholder for an attribute name
    pub fn with_expression_attribute_name(
        mut self,
        placeholder: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        let _ = self.raw.names.insert(placeholder.into(), attribute.into());
        self
    }

    /// Placeholder values
    pub fn with_expression_attribute_values<U: Serialize>(mut self, values: U) -> Result<Self, Error> {
        let values: Item = to_item(values)?;
        self.raw.values.extend(values);
        Ok(self)
    }
}
