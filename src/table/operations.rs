use aws_sdk_dynamodb::operation::delete_item::DeleteItemOutput;
use aws_sdk_dynamodb::operation::update_item::UpdateItemOutput;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnConsumedCapacity, ReturnValue};
use serde::{Serialize, de::DeserializeOwned};
use serde_dynamo::{from_item, to_item};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use crate::error::Error;
use crate::mapper::DynamoMapper;
use crate::schema::{AttributeType, IndexSchema};
use crate::table::batch::{BatchReadOutput, BatchWriteOutput};
use crate::table::condition::ExpressionBuilder;
use crate::table::expression::{
    DeleteExpression, QueryExpression, RawExpression, SaveExpression, ScanExpression,
};
use crate::table::helpers::keys::key_for;
use crate::table::paginated::PaginatedList;
use crate::table::types::{CompositeKey, Item, KeyValue, ResultPage, RetryConfig};
use crate::table::version::{ItemLayout, SaveRequest, plan_delete, plan_save};

/// A record type stored in a DynamoDB table
///
/// The constants describe the table: its name, its keys, its secondary
/// indexes, and the attributes the mapper manages (version and generated key).
/// Items are marshalled with `serde_dynamo`.
///
/// # Example
///
/// ```rust,no_run
/// use dynamo_mapper::schema::{IndexSchema, KeyAttribute};
/// use dynamo_mapper::{DynamoTable, Error};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Order {
///     user_id: String,
///     order_id: String,
///     status: String,
///     total: u32,
///     version: Option<u64>,
/// }
///
/// impl DynamoTable for Order {
///     type PK = String;
///     type SK = String;
///
///     const TABLE: &'static str = "orders";
///     const PARTITION_KEY: &'static str = "user_id";
///     const SORT_KEY: Option<&'static str> = Some("order_id");
///     const INDEXES: &'static [IndexSchema] = &[
///         IndexSchema::global("by-status", KeyAttribute::string("status"))
///             .with_range_key(KeyAttribute::number("total")),
///     ];
///     const VERSION_ATTRIBUTE: Option<&'static str> = Some("version");
///
///     fn partition_key(&self) -> String {
///         self.user_id.clone()
///     }
///
///     fn sort_key(&self) -> Option<String> {
///         Some(self.order_id.clone())
///     }
/// }
///
/// # async fn example() -> Result<(), Error> {
/// let mut order = Order {
///     user_id: "user123".to_string(),
///     order_id: "2024-0001".to_string(),
///     status: "open".to_string(),
///     total: 40,
///     version: None,
/// };
///
/// order.save().await?;
/// assert_eq!(order.version, Some(1));
/// # Ok(())
/// # }
/// ```
pub trait DynamoTable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Associated partition key type
    type PK: KeyValue;

    /// Associated sort key type
    type SK: KeyValue;

    /// Name of the table
    const TABLE: &'static str;

    /// Partition key of the table
    const PARTITION_KEY: &'static str;

    /// Partition key attribute type
    const PARTITION_KEY_TYPE: AttributeType = AttributeType::S;

    /// Sort key of the table
    const SORT_KEY: Option<&'static str> = None;

    /// Sort key attribute type
    const SORT_KEY_TYPE: AttributeType = AttributeType::S;

    /// Secondary indexes declared on the table
    const INDEXES: &'static [IndexSchema] = &[];

    /// Numeric attribute used for optimistic locking
    const VERSION_ATTRIBUTE: Option<&'static str> = None;

    /// String key attribute filled with a UUID when saved without a value
    const AUTO_GENERATED_KEY: Option<&'static str> = None;

    /// Default page size for queries and scans
    const DEFAULT_PAGE_SIZE: u16 = 10;

    /// Retry configuration for batch operations
    const BATCH_RETRIES_CONFIG: RetryConfig = RetryConfig {
        max_retries: 2,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(2000),
    };

    /// Partition key value
    fn partition_key(&self) -> Self::PK;

    /// Sort key value
    fn sort_key(&self) -> Option<Self::SK> {
        None
    }

    /// Composite key value
    fn composite_key(&self) -> CompositeKey<Self::PK, Self::SK> {
        (self.partition_key(), self.sort_key())
    }

    /// Mapper behind the convenience methods
    ///
    /// By default, the global mapper. Can be overridden for testing or to
    /// use a different client or configuration per table.
    fn mapper() -> impl Future<Output = &'static DynamoMapper> {
        crate::dynamo_mapper()
    }

    /// Load an item by its primary key
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use dynamo_mapper::{DynamoTable, Error};
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Serialize, Deserialize)]
    /// # struct User { user_id: String, name: String }
    /// # impl DynamoTable for User {
    /// #     type PK = String;
    /// #     type SK = String;
    /// #     const TABLE: &'static str = "users";
    /// #     const PARTITION_KEY: &'static str = "user_id";
    /// #     fn partition_key(&self) -> String { self.user_id.clone() }
    /// # }
    ///
    /// # async fn example() -> Result<(), Error> {
    /// match User::load(&"user123".to_string(), None).await? {
    ///     Some(user) => println!("Found user: {}", user.name),
    ///     None => println!("User not found"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn load(
        partition_key: &Self::PK,
        sort_key: Option<&Self::SK>,
    ) -> impl Future<Output = Result<Option<Self>, Error>> {
        async move {
            Self::mapper()
                .await
                .load::<Self>(partition_key, sort_key)
                .await
        }
    }

    /// Save the item under the configured save behavior
    ///
    /// The item is updated in place with its new version and generated key.
    fn save(&mut self) -> impl Future<Output = Result<(), Error>> {
        async move { Self::mapper().await.save(self).await }
    }

    /// Save the item with an extra condition
    fn save_with(
        &mut self,
        expression: &SaveExpression,
    ) -> impl Future<Output = Result<(), Error>> {
        async move { Self::mapper().await.save_with(self, expression).await }
    }

    /// Delete the item, checking its version when it has one
    fn delete(&self) -> impl Future<Output = Result<DeleteItemOutput, Error>> {
        async move { Self::mapper().await.delete(self).await }
    }

    /// Delete the item with an extra condition
    fn delete_with(
        &self,
        expression: &DeleteExpression,
    ) -> impl Future<Output = Result<DeleteItemOutput, Error>> {
        async move { Self::mapper().await.delete_with(self, expression).await }
    }

    /// Delete by primary key, unconditionally
    fn delete_by_key(
        partition_key: &Self::PK,
        sort_key: Option<&Self::SK>,
    ) -> impl Future<Output = Result<DeleteItemOutput, Error>> {
        async move {
            Self::mapper()
                .await
                .delete_by_key::<Self>(partition_key, sort_key)
                .await
        }
    }

    /// SET the fields of `update` on the item with the given key
    fn update_fields<U: Serialize + Send>(
        partition_key: &Self::PK,
        sort_key: Option<&Self::SK>,
        update: U,
    ) -> impl Future<Output = Result<UpdateItemOutput, Error>> {
        async move {
            Self::mapper()
                .await
                .update_fields::<Self, U>(partition_key, sort_key, update)
                .await
        }
    }

    /// Atomically add to numeric fields
    fn increment(
        partition_key: &Self::PK,
        sort_key: Option<&Self::SK>,
        fields: &[(&str, i64)],
    ) -> impl Future<Output = Result<UpdateItemOutput, Error>> {
        async move {
            Self::mapper()
                .await
                .increment::<Self>(partition_key, sort_key, fields)
                .await
        }
    }

    /// Query into a paginated list
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use dynamo_mapper::{Condition, DynamoTable, Error, QueryExpression};
    /// use aws_sdk_dynamodb::types::AttributeValue;
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Clone, Serialize, Deserialize)]
    /// # struct Order { user_id: String, order_id: String }
    /// # impl DynamoTable for Order {
    /// #     type PK = String;
    /// #     type SK = String;
    /// #     const TABLE: &'static str = "orders";
    /// #     const PARTITION_KEY: &'static str = "user_id";
    /// #     const SORT_KEY: Option<&'static str> = Some("order_id");
    /// #     fn partition_key(&self) -> String { self.user_id.clone() }
    /// #     fn sort_key(&self) -> Option<String> { Some(self.order_id.clone()) }
    /// # }
    ///
    /// # async fn example() -> Result<(), Error> {
    /// let expression = QueryExpression::for_partition_key(&"user123".to_string())?
    ///     .with_range_key_condition(
    ///         "order_id",
    ///         Condition::BeginsWith(AttributeValue::S("2024-".into())),
    ///     );
    ///
    /// let orders = Order::query(expression).await?.into_vec().await?;
    /// # Ok(())
    /// # }
    /// ```
    fn query(
        expression: QueryExpression<Self>,
    ) -> impl Future<Output = Result<PaginatedList<Self>, Error>> {
        async move { Self::mapper().await.query(&expression).await }
    }

    /// A single page of query results
    fn query_page(
        expression: QueryExpression<Self>,
    ) -> impl Future<Output = Result<ResultPage<Self>, Error>> {
        async move { Self::mapper().await.query_page(&expression).await }
    }

    /// Number of items matching the query
    fn count_query(
        expression: QueryExpression<Self>,
    ) -> impl Future<Output = Result<usize, Error>> {
        async move { Self::mapper().await.count_query(&expression).await }
    }

    /// Scan into a paginated list
    fn scan(
        expression: ScanExpression,
    ) -> impl Future<Output = Result<PaginatedList<Self>, Error>> {
        async move { Self::mapper().await.scan::<Self>(&expression).await }
    }

    /// A single page of scan results
    fn scan_page(
        expression: ScanExpression,
    ) -> impl Future<Output = Result<ResultPage<Self>, Error>> {
        async move { Self::mapper().await.scan_page::<Self>(&expression).await }
    }

    /// Scan `total_segments` segments concurrently
    fn parallel_scan(
        expression: ScanExpression,
        total_segments: i32,
    ) -> impl Future<Output = Result<PaginatedList<Self>, Error>> {
        async move {
            Self::mapper()
                .await
                .parallel_scan::<Self>(&expression, total_segments)
                .await
        }
    }

    /// Number of items matching the scan
    fn count_scan(expression: ScanExpression) -> impl Future<Output = Result<usize, Error>> {
        async move { Self::mapper().await.count_scan::<Self>(&expression).await }
    }

    /// Batch put multiple items
    ///
    /// Efficiently writes up to 25 items per batch request. Automatically
    /// handles batching, retries, and unprocessed items.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use dynamo_mapper::{DynamoTable, Error};
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Clone, Serialize, Deserialize)]
    /// # struct User { user_id: String, name: String }
    /// # impl DynamoTable for User {
    /// #     type PK = String;
    /// #     type SK = String;
    /// #     const TABLE: &'static str = "users";
    /// #     const PARTITION_KEY: &'static str = "user_id";
    /// #     fn partition_key(&self) -> String { self.user_id.clone() }
    /// # }
    ///
    /// # async fn example() -> Result<(), Error> {
    /// let users = vec![
    ///     User { user_id: "u1".to_string(), name: "Ada".to_string() },
    ///     User { user_id: "u2".to_string(), name: "Grace".to_string() },
    /// ];
    ///
    /// let result = User::batch_save(users).await?;
    /// if !result.is_success() {
    ///     println!("{} items were not written", result.failed_count());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn batch_save(
        items: Vec<Self>,
    ) -> impl Future<Output = Result<BatchWriteOutput<Self>, Error>>
    where
        Self: Clone,
    {
        async move { Self::mapper().await.batch_save(items).await }
    }

    /// Batch delete multiple items
    fn batch_delete(
        items: Vec<Self>,
    ) -> impl Future<Output = Result<BatchWriteOutput<Self>, Error>>
    where
        Self: Clone,
    {
        async move { Self::mapper().await.batch_delete(items).await }
    }

    /// Batch load multiple items by key
    fn batch_load(
        keys: Vec<CompositeKey<Self::PK, Self::SK>>,
    ) -> impl Future<Output = Result<BatchReadOutput<Self>, Error>> {
        async move { Self::mapper().await.batch_load::<Self>(keys).await }
    }
}

/// Update expression with its placeholders
#[derive(Debug, PartialEq)]
struct UpdateClause {
    expression: String,
    names: Option<HashMap<String, String>>,
    values: Option<HashMap<String, AttributeValue>>,
}

impl UpdateClause {
    fn from_builder(expression: String, builder: ExpressionBuilder) -> Self {
        let (names, values) = builder.into_parts();
        Self {
            expression,
            names,
            values,
        }
    }
}

fn reject_key_attribute(layout: &ItemLayout, attribute: &str) -> Result<(), Error> {
    if attribute == layout.hash_key || layout.range_key == Some(attribute) {
        return Err(Error::InvalidQuery(format!(
            "key attribute `{attribute}` of table `{}` cannot be updated",
            layout.table
        )));
    }
    Ok(())
}

/// `SET` clause for every field of `fields`
fn set_clause(layout: &ItemLayout, fields: Item) -> Result<Option<UpdateClause>, Error> {
    let mut builder = ExpressionBuilder::new();
    let mut assignments = Vec::with_capacity(fields.len());

    let fields: BTreeMap<String, AttributeValue> = fields.into_iter().collect();

    for (attribute, value) in fields {
        reject_key_attribute(layout, &attribute)?;
        let name = builder.name(&attribute);
        let value = builder.value(value);
        assignments.push(format!("{name} = {value}"));
    }

    if assignments.is_empty() {
        return Ok(None);
    }

    let expression = format!("SET {}", assignments.join(", "));
    Ok(Some(UpdateClause::from_builder(expression, builder)))
}

/// `ADD` clause for numeric increments
fn add_clause(layout: &ItemLayout, fields: &[(&str, i64)]) -> Result<Option<UpdateClause>, Error> {
    let mut builder = ExpressionBuilder::new();
    let mut additions = Vec::with_capacity(fields.len());

    for (attribute, by) in fields {
        reject_key_attribute(layout, attribute)?;
        let name = builder.name(attribute);
        let value = builder.value(AttributeValue::N(by.to_string()));
        additions.push(format!("{name} {value}"));
    }

    if additions.is_empty() {
        return Ok(None);
    }

    let expression = format!("ADD {}", additions.join(", "));
    Ok(Some(UpdateClause::from_builder(expression, builder)))
}

impl DynamoMapper {
    /// Get a single item by its primary key
    ///
    /// Returns `Ok(None)` when no item has that key. The sort key is required
    /// when `T` declares one.
    pub async fn load<T: DynamoTable>(
        &self,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
    ) -> Result<Option<T>, Error> {
        let table_name = self.table_name::<T>();
        let key = key_for::<T>(&table_name, partition_key, sort_key)?;

        tracing::debug!(table = %table_name, "get item");

        let result = self
            .client()
            .get_item()
            .table_name(&table_name)
            .set_key(Some(key))
            .consistent_read(self.config().consistent_reads.as_bool())
            .return_consumed_capacity(ReturnConsumedCapacity::None)
            .send()
            .await?;

        if let Some(item) = result.item {
            let item: T = from_item(item)?;

            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    /// Save `item` under the configured save behavior
    ///
    /// On success `item` carries the stored version and generated key.
    pub async fn save<T: DynamoTable>(&self, item: &mut T) -> Result<(), Error> {
        self.save_item(item, None).await
    }

    /// Save `item`; the condition of `expression` must also hold
    pub async fn save_with<T: DynamoTable>(
        &self,
        item: &mut T,
        expression: &SaveExpression,
    ) -> Result<(), Error> {
        self.save_item(item, Some(&expression.raw)).await
    }

    async fn save_item<T: DynamoTable>(
        &self,
        item: &mut T,
        user: Option<&RawExpression>,
    ) -> Result<(), Error> {
        let table_name = self.table_name::<T>();
        let behavior = self.config().save_behavior;
        let values: Item = to_item(&*item)?;

        let plan = plan_save(&ItemLayout::of::<T>(), values, behavior, user)?;

        match plan.request {
            SaveRequest::Put { item, condition } => {
                tracing::debug!(table = %table_name, ?behavior, "put item");

                let _ = self
                    .client()
                    .put_item()
                    .table_name(&table_name)
                    .set_item(Some(item))
                    .set_condition_expression(condition.condition_expression)
                    .set_expression_attribute_names(condition.names)
                    .set_expression_attribute_values(condition.values)
                    .return_values(ReturnValue::None)
                    .send()
                    .await?;
            }
            SaveRequest::Update {
                key,
                update_expression,
                condition,
            } => {
                tracing::debug!(table = %table_name, ?behavior, "update item");

                let _ = self
                    .client()
                    .update_item()
                    .table_name(&table_name)
                    .set_key(Some(key))
                    .set_update_expression(update_expression)
                    .set_condition_expression(condition.condition_expression)
                    .set_expression_attribute_names(condition.names)
                    .set_expression_attribute_values(condition.values)
                    .return_values(ReturnValue::None)
                    .send()
                    .await?;
            }
        }

        *item = from_item(plan.item)?;
        Ok(())
    }

    /// Delete `item` by its key
    ///
    /// A versioned item is only deleted while its stored version matches,
    /// unless the save behavior is `Clobber`.
    pub async fn delete<T: DynamoTable>(&self, item: &T) -> Result<DeleteItemOutput, Error> {
        self.delete_item(item, None).await
    }

    /// Delete `item`; the condition of `expression` must also hold
    pub async fn delete_with<T: DynamoTable>(
        &self,
        item: &T,
        expression: &DeleteExpression,
    ) -> Result<DeleteItemOutput, Error> {
        self.delete_item(item, Some(&expression.raw)).await
    }

    async fn delete_item<T: DynamoTable>(
        &self,
        item: &T,
        user: Option<&RawExpression>,
    ) -> Result<DeleteItemOutput, Error> {
        let table_name = self.table_name::<T>();
        let values: Item = to_item(item)?;

        let (key, condition) = plan_delete(
            &ItemLayout::of::<T>(),
            &values,
            self.config().save_behavior,
            user,
        )?;

        tracing::debug!(table = %table_name, "delete item");

        Ok(self
            .client()
            .delete_item()
            .table_name(&table_name)
            .set_key(Some(key))
            .set_condition_expression(condition.condition_expression)
            .set_expression_attribute_names(condition.names)
            .set_expression_attribute_values(condition.values)
            .send()
            .await?)
    }

    /// Delete by primary key without any condition
    pub async fn delete_by_key<T: DynamoTable>(
        &self,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
    ) -> Result<DeleteItemOutput, Error> {
        let table_name = self.table_name::<T>();
        let key = key_for::<T>(&table_name, partition_key, sort_key)?;

        tracing::debug!(table = %table_name, "delete item by key");

        Ok(self
            .client()
            .delete_item()
            .table_name(&table_name)
            .set_key(Some(key))
            .send()
            .await?)
    }

    /// SET every field of `update` on the item with the given key
    ///
    /// Creates the item when it does not exist. Key attributes cannot be
    /// updated; an empty update does nothing.
    pub async fn update_fields<T, U>(
        &self,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
        update: U,
    ) -> Result<UpdateItemOutput, Error>
    where
        T: DynamoTable,
        U: Serialize,
    {
        let table_name = self.table_name::<T>();
        let key = key_for::<T>(&table_name, partition_key, sort_key)?;
        let fields: Item = to_item(update)?;

        let Some(clause) = set_clause(&ItemLayout::of::<T>(), fields)? else {
            return Ok(UpdateItemOutput::builder().build());
        };

        tracing::debug!(table = %table_name, "update fields");

        Ok(self
            .client()
            .update_item()
            .table_name(&table_name)
            .set_key(Some(key))
            .update_expression(clause.expression)
            .set_expression_attribute_names(clause.names)
            .set_expression_attribute_values(clause.values)
            .return_values(ReturnValue::None)
            .send()
            .await?)
    }

    /// Atomically add `by` to each field; a missing field starts at 0
    pub async fn increment<T: DynamoTable>(
        &self,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
        fields: &[(&str, i64)],
    ) -> Result<UpdateItemOutput, Error> {
        let table_name = self.table_name::<T>();
        let key = key_for::<T>(&table_name, partition_key, sort_key)?;

        let Some(clause) = add_clause(&ItemLayout::of::<T>(), fields)? else {
            return Ok(UpdateItemOutput::builder().build());
        };

        tracing::debug!(table = %table_name, fields = fields.len(), "increment");

        Ok(self
            .client()
            .update_item()
            .table_name(&table_name)
            .set_key(Some(key))
            .update_expression(clause.expression)
            .set_expression_attribute_names(clause.names)
            .set_expression_attribute_values(clause.values)
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Counter {
        name: String,
        hits: i64,
    }

    impl DynamoTable for Counter {
        type PK = String;
        type SK = String;
        const TABLE: &'static str = "counters";
        const PARTITION_KEY: &'static str = "name";

        fn partition_key(&self) -> String {
            self.name.clone()
        }
    }

    #[derive(Serialize)]
    struct Rename {
        title: String,
        subtitle: Option<String>,
    }

    fn layout() -> ItemLayout {
        ItemLayout::of::<Counter>()
    }

    #[test]
    fn test_trait_defaults() {
        let counter = Counter {
            name: "home".into(),
            hits: 1,
        };

        assert_eq!(counter.composite_key(), ("home".to_string(), None));
        assert_eq!(Counter::DEFAULT_PAGE_SIZE, 10);
        assert_eq!(Counter::PARTITION_KEY_TYPE, AttributeType::S);
        assert!(Counter::INDEXES.is_empty());
        assert_eq!(Counter::BATCH_RETRIES_CONFIG.max_retries, 2);
    }

    #[test]
    fn test_set_clause() {
        let fields: Item = to_item(Rename {
            title: "Guide".into(),
            subtitle: None,
        })
        .unwrap();

        let clause = set_clause(&layout(), fields).unwrap().unwrap();

        assert_eq!(clause.expression, "SET #attr0 = :val0, #attr1 = :val1");
        let names = clause.names.unwrap();
        assert_eq!(names["#attr0"], "subtitle");
        assert_eq!(names["#attr1"], "title");
        let values = clause.values.unwrap();
        assert_eq!(values[":val0"], AttributeValue::Null(true));
        assert_eq!(values[":val1"], AttributeValue::S("Guide".into()));
    }

    #[test]
    fn test_set_clause_rejects_key() {
        let fields = Item::from([("name".to_string(), AttributeValue::S("other".into()))]);

        let err = set_clause(&layout(), fields).unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn test_empty_clauses() {
        assert_eq!(set_clause(&layout(), Item::new()).unwrap(), None);
        assert_eq!(add_clause(&layout(), &[]).unwrap(), None);
    }

    #[test]
    fn test_add_clause() {
        let clause = add_clause(&layout(), &[("hits", 1), ("misses", -2)])
            .unwrap()
            .unwrap();

        assert_eq!(clause.expression, "ADD #attr0 :val0, #attr1 :val1");
        let values = clause.values.unwrap();
        assert_eq!(values[":val0"], AttributeValue::N("1".into()));
        assert_eq!(values[":val1"], AttributeValue::N("-2".into()));
    }
}
