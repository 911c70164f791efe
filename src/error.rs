use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::batch_get_item::BatchGetItemError;
use aws_sdk_dynamodb::operation::batch_write_item::BatchWriteItemError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::delete_table::DeleteTableError;
use aws_sdk_dynamodb::operation::get_item::GetItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::scan::ScanError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use serde_dynamo::Error as SerdeDynamoError;
use thiserror::Error;

type DynamoPutError = SdkError<PutItemError, Response>;
type DynamoUpdateError = SdkError<UpdateItemError, Response>;
type DynamoGetError = SdkError<GetItemError, Response>;
type DynamoQueryError = SdkError<QueryError, Response>;
type DynamoScanError = SdkError<ScanError, Response>;
type DynamoDeleteItemError = SdkError<DeleteItemError, Response>;
type DynamoCreateTableError = SdkError<CreateTableError, Response>;
type DynamoDeleteTableError = SdkError<DeleteTableError, Response>;
type DynamoBatchWriteItemError = SdkError<BatchWriteItemError, Response>;
type DynamoBatchGetItemError = SdkError<BatchGetItemError, Response>;

/// Mapper error
#[derive(Debug, Error)]
pub enum Error {
    /// Serde DynamoDB serialization/deserialization error
    #[error("DynamoDB serialization error: {0}")]
    SerdeDynamo(#[from] SerdeDynamoError),
    /// DynamoDB request builder error
    #[error("DynamoDB request builder error: {0}")]
    BuildError(#[from] BuildError),
    /// DynamoDB PutItem operation error
    #[error("DynamoDB PutItem operation failed: {0}")]
    DynamoPutError(#[from] DynamoPutError),
    /// DynamoDB GetItem operation error
    #[error("DynamoDB GetItem operation failed: {0}")]
    DynamoGetError(#[from] DynamoGetError),
    /// DynamoDB Query operation error
    #[error("DynamoDB Query operation failed: {0}")]
    DynamoQueryError(#[from] DynamoQueryError),
    /// DynamoDB Scan operation error
    #[error("DynamoDB Scan operation failed: {0}")]
    DynamoScanError(#[from] DynamoScanError),
    /// DynamoDB UpdateItem operation error
    #[error("DynamoDB UpdateItem operation failed: {0}")]
    DynamoUpdateError(#[from] DynamoUpdateError),
    /// DynamoDB DeleteItem operation error
    #[error("DynamoDB DeleteItem operation failed: {0}")]
    DynamoDeleteItemError(#[from] DynamoDeleteItemError),
    /// DynamoDB CreateTable operation error
    #[error("DynamoDB CreateTable operation failed: {0}")]
    DynamoCreateTableError(#[from] DynamoCreateTableError),
    /// DynamoDB DeleteTable operation error
    #[error("DynamoDB DeleteTable operation failed: {0}")]
    DynamoDeleteTableError(#[from] DynamoDeleteTableError),
    /// DynamoDB BatchWriteItem operation error
    #[error("DynamoDB BatchWriteItem operation failed: {0}")]
    DynamoBatchWriteItemError(#[from] DynamoBatchWriteItemError),
    /// DynamoDB BatchGetItem operation error
    #[error("DynamoDB BatchGetItem operation failed: {0}")]
    DynamoBatchGetItemError(#[from] DynamoBatchGetItemError),
    /// The query or scan expression cannot be turned into a request
    #[error("Illegal query expression: {0}")]
    InvalidQuery(String),
    /// More than one key or index matches the query expression
    #[error("Ambiguous query expression: {0}")]
    AmbiguousQuery(String),
    /// A key attribute has no value
    #[error("Missing value for key attribute `{attribute}` of table `{table}`")]
    MissingKey {
        /// Table the key belongs to
        table: String,
        /// Name of the key attribute
        attribute: String,
    },
    /// The version attribute holds something other than a number
    #[error("Invalid version attribute `{attribute}`: {reason}")]
    InvalidVersion {
        /// Name of the version attribute
        attribute: String,
        /// What was wrong with it
        reason: String,
    },
    /// Operation not available on an iteration-only paginated list
    #[error("{0} is not supported by an iteration-only paginated list")]
    IterationOnly(&'static str),
}

impl Error {
    /// Check if the error is a DynamoDB ConditionalCheckFailedException
    ///
    /// Saves and deletes of versioned items fail this way when another writer
    /// got there first, as do writes whose own condition expression is false.
    ///
    /// # Example
    /// ```no_run
    /// # use dynamo_mapper::Error;
    /// # async fn example(error: Error) {
    /// if error.is_conditional_check_failed() {
    ///     println!("Item was modified by another process");
    /// }
    /// # }
    /// ```
    pub fn is_conditional_check_failed(&self) -> bool {
        match self {
            Error::DynamoUpdateError(e) => matches!(
                e.as_service_error(),
                Some(UpdateItemError::ConditionalCheckFailedException(_))
            ),
            Error::DynamoPutError(e) => matches!(
                e.as_service_error(),
                Some(PutItemError::ConditionalCheckFailedException(_))
            ),
            Error::DynamoDeleteItemError(e) => matches!(
                e.as_service_error(),
                Some(DeleteItemError::ConditionalCheckFailedException(_))
            ),
            _ => false,
        }
    }

    /// Check if the error is a serialization/deserialization error
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::SerdeDynamo(_))
    }

    /// Check if the error was raised while resolving a query or scan expression
    pub fn is_invalid_query(&self) -> bool {
        matches!(self, Error::InvalidQuery(_) | Error::AmbiguousQuery(_))
    }

    /// Check if the error came back from a DynamoDB request
    pub fn is_dynamodb_error(&self) -> bool {
        matches!(
            self,
            Error::BuildError(_)
                | Error::DynamoPutError(_)
                | Error::DynamoGetError(_)
                | Error::DynamoQueryError(_)
                | Error::DynamoScanError(_)
                | Error::DynamoUpdateError(_)
                | Error::DynamoDeleteItemError(_)
                | Error::DynamoCreateTableError(_)
                | Error::DynamoDeleteTableError(_)
                | Error::DynamoBatchWriteItemError(_)
                | Error::DynamoBatchGetItemError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_serialization_error() {
        let err = Error::BuildError(BuildError::other("test"));
        assert!(!err.is_serialization_error());
    }

    #[test]
    fn test_is_dynamodb_error() {
        let err = Error::BuildError(BuildError::other("test"));
        assert!(err.is_dynamodb_error());

        let err = Error::InvalidQuery("no hash key".into());
        assert!(!err.is_dynamodb_error());
    }

    #[test]
    fn test_error_conversion() {
        let build_err = BuildError::other("test");
        let err: Error = build_err.into();
        assert!(matches!(err, Error::BuildError(_)));
    }

    #[test]
    fn test_invalid_query_predicates() {
        assert!(Error::InvalidQuery("x".into()).is_invalid_query());
        assert!(Error::AmbiguousQuery("x".into()).is_invalid_query());
        assert!(!Error::IterationOnly("len").is_invalid_query());
        assert!(!Error::InvalidQuery("x".into()).is_conditional_check_failed());
    }

    #[test]
    fn test_error_display() {
        let err = Error::AmbiguousQuery("two indexes".into());
        assert_eq!(err.to_string(), "Ambiguous query expression: two indexes");

        let err = Error::MissingKey {
            table: "orders".into(),
            attribute: "order_id".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing value for key attribute `order_id` of table `orders`"
        );

        let err = Error::IterationOnly("len");
        assert!(err.to_string().starts_with("len is not supported"));
    }
}
