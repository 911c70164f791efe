use aws_sdk_dynamodb::types::{AttributeValue, ConsumedCapacity};
use serde::{Serialize, de::DeserializeOwned};
use serde_dynamo::from_items;
use std::collections::HashMap;
use std::{fmt, time::Duration};

use crate::error::Error;
use crate::table::DynamoTable;

/// A raw DynamoDB item or key
pub type Item = HashMap<String, AttributeValue>;

/// Bounds shared by partition and sort key value types
pub trait KeyValue: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug {}

impl<T> KeyValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug {}

/// Partition key type alias
pub type PartitionKey<PK> = PK;

/// Sort key type alias
pub type SortKey<SK> = Option<SK>;

/// Composite key type alias
pub type CompositeKey<PK, SK> = (PK, SortKey<SK>);

/// One page of query or scan results
#[must_use = "query results should be used or you'll lose the fetched data"]
#[derive(Clone, Debug)]
pub struct ResultPage<T> {
    /// The items returned by the request
    pub items: Vec<T>,
    /// Number of items returned, after any filter was applied
    pub count: i32,
    /// Number of items evaluated before the filter
    pub scanned_count: i32,
    /// Where the request stopped; `None` on the last page
    pub last_evaluated_key: Option<Item>,
    /// Capacity consumed by the request
    pub consumed_capacity: Option<ConsumedCapacity>,
}

impl<T> Default for ResultPage<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            scanned_count: 0,
            last_evaluated_key: None,
            consumed_capacity: None,
        }
    }
}

impl<T> ResultPage<T> {
    /// Whether another page may follow
    pub fn has_more(&self) -> bool {
        self.last_evaluated_key
            .as_ref()
            .map(|key| !key.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn from_raw(
        items: Option<Vec<Item>>,
        count: i32,
        scanned_count: i32,
        last_evaluated_key: Option<Item>,
        consumed_capacity: Option<ConsumedCapacity>,
    ) -> Result<Self, Error>
    where
        T: DynamoTable,
    {
        let items: Vec<T> = match items {
            Some(items) => from_items(items)?,
            None => Vec::new(),
        };

        Ok(Self {
            items,
            count,
            scanned_count,
            last_evaluated_key: last_evaluated_key.filter(|key| !key.is_empty()),
            consumed_capacity,
        })
    }
}

/// Retry configuration for batch operations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry rounds for unprocessed items
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(3000),
        }
    }
}
