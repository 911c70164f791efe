mod batch;
mod condition;
mod expression;
mod helpers;
mod operations;
mod paginated;
mod query;
mod resolver;
mod types;
mod version;

pub use batch::{BatchReadOutput, BatchWriteOutput};
pub use condition::{Condition, ConditionalOperator, attribute_value};
pub use expression::{DeleteExpression, QueryExpression, SaveExpression, ScanExpression};
pub use operations::DynamoTable;
pub use paginated::PaginatedList;
pub use types::{CompositeKey, Item, KeyValue, PartitionKey, ResultPage, RetryConfig, SortKey};
