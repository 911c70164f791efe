//! # DynamoDB Object Mapper
//!
//! A typed object mapper for DynamoDB:
//! - Index-aware queries: the table, GSI or LSI is inferred from the query
//! - Paginated lists loaded lazily, eagerly or for iteration only
//! - Optimistic locking through a version attribute
//! - Auto-generated UUID keys
//! - Batch operations with exponential backoff and jitter
//! - Table generation from the declared schema
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dynamo_mapper::{DynamoTable, Error, QueryExpression};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     user_id: String,
//!     email: String,
//!     name: String,
//!     version: Option<u64>,
//! }
//!
//! impl DynamoTable for User {
//!     type PK = String;
//!     type SK = String;
//!
//!     const TABLE: &'static str = "users";
//!     const PARTITION_KEY: &'static str = "user_id";
//!     const VERSION_ATTRIBUTE: Option<&'static str> = Some("version");
//!
//!     fn partition_key(&self) -> Self::PK {
//!         self.user_id.clone()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     // Initialize the global DynamoDB client
//!     let config = aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
//!     dynamo_mapper::init(&config).await;
//!
//!     // Save an item; the version goes from None to 1
//!     let mut user = User {
//!         user_id: "123".to_string(),
//!         email: "user@example.com".to_string(),
//!         name: "John Doe".to_string(),
//!         version: None,
//!     };
//!     user.save().await?;
//!
//!     // Load it back
//!     let retrieved = User::load(&"123".to_string(), None).await?;
//!
//!     // Query by partition key
//!     let users = User::query(QueryExpression::for_partition_key(&"123".to_string())?)
//!         .await?
//!         .into_vec()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
#![warn(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results,
    deprecated,
    unknown_lints,
    unreachable_code,
    unused_mut
)]

mod config;
mod error;
mod mapper;

pub use config::{
    ConsistentReads, MapperConfig, PaginationLoadingStrategy, SaveBehavior, TableNameOverride,
};
pub use error::Error;
pub use mapper::DynamoMapper;

/// Key and index declarations
pub mod schema;

/// Mapped tables, expressions and results
pub mod table;

/// Table generation
pub mod setup;

// Re-export main types for convenience
pub use table::{
    BatchReadOutput, BatchWriteOutput, CompositeKey, Condition, ConditionalOperator,
    DeleteExpression, DynamoTable, PaginatedList, QueryExpression, ResultPage, SaveExpression,
    ScanExpression, attribute_value,
};

// Re-export aws-config types for configuration
pub use aws_config::{
    BehaviorVersion, Region, SdkConfig, defaults,
    meta::region::{ProvideRegion, RegionProviderChain},
    retry::{RetryConfig, RetryMode},
    timeout::TimeoutConfig,
};

// Re-export aws-types for advanced configuration
pub use aws_types::sdk_config::Builder as SdkConfigBuilder;

use aws_sdk_dynamodb::Client as DynamoDbClient;
use tokio::sync::OnceCell;

/// Global DynamoDB client instance
static GLOBAL_CLIENT: OnceCell<DynamoDbClient> = OnceCell::const_new();

/// Global mapper instance
static GLOBAL_MAPPER: OnceCell<DynamoMapper> = OnceCell::const_new();

/// Initialize the global DynamoDB client with default sensible settings
///
/// It configures:
/// - Adaptive retry mode with 3 max attempts
/// - Exponential backoff starting at 1 second
/// - Connect timeout: 3 seconds
/// - Read timeout: 20 seconds
/// - Operation timeout: 60 seconds
/// - LocalStack support via AWS_PROFILE=localstack
async fn aws_config_defaults() -> SdkConfig {
    use std::time::Duration;

    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .operation_timeout(Duration::from_secs(60))
        .build();

    let mut loader = defaults(BehaviorVersion::latest())
        .retry_config(
            RetryConfig::adaptive()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_secs(1)),
        )
        .timeout_config(timeout_config);

    // Support LocalStack via AWS_PROFILE=localstack
    if std::env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
        loader = loader.endpoint_url("http://127.0.0.1:4566");
    }

    loader.load().await
}

/// Initialize the global DynamoDB client with a custom AWS config
///
/// Has no effect once the client exists.
///
/// # Example
///
/// ```rust,no_run
/// #[tokio::main]
/// async fn main() {
///     let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
///         .region(aws_config::Region::new("us-west-2"))
///         .load()
///         .await;
///     dynamo_mapper::init(&config).await;
/// }
/// ```
pub async fn init(config: &SdkConfig) {
    let _ = GLOBAL_CLIENT
        .get_or_init(|| async { DynamoDbClient::new(config) })
        .await;
}

/// Initialize the global DynamoDB client with a custom client instance
///
/// Useful for testing or when you need fine-grained control over client configuration.
pub async fn init_with_client(client: DynamoDbClient) {
    let _ = GLOBAL_CLIENT.get_or_init(|| async { client }).await;
}

/// Get a reference to the global DynamoDB client
///
/// Automatically initializes the client with sensible defaults if not already initialized.
/// For custom configuration, call [`init`] or [`init_with_client`] before using this function.
///
/// ```rust,no_run
/// # async fn example() {
/// let client = dynamo_mapper::dynamodb_client().await;
/// let _tables = client.list_tables().send().await;
/// # }
/// ```
pub async fn dynamodb_client() -> &'static DynamoDbClient {
    GLOBAL_CLIENT
        .get_or_init(|| async {
            let config = aws_config_defaults().await;
            DynamoDbClient::new(&config)
        })
        .await
}

/// Initialize the global mapper with `config`
///
/// Has no effect once the mapper exists. The global client is used.
///
/// ```rust,no_run
/// use dynamo_mapper::{MapperConfig, SaveBehavior};
///
/// # async fn example() {
/// dynamo_mapper::init_mapper(MapperConfig::default().with_save_behavior(SaveBehavior::Put)).await;
/// # }
/// ```
pub async fn init_mapper(config: MapperConfig) {
    let client = dynamodb_client().await.clone();
    let _ = GLOBAL_MAPPER
        .get_or_init(|| async { DynamoMapper::new(client, config) })
        .await;
}

/// Get a reference to the global mapper
///
/// Built on first use from the global client and [`MapperConfig::from_env`].
/// It backs the convenience methods of [`DynamoTable`].
pub async fn dynamo_mapper() -> &'static DynamoMapper {
    GLOBAL_MAPPER
        .get_or_init(|| async {
            let client = dynamodb_client().await.clone();
            DynamoMapper::new(client, MapperConfig::from_env())
        })
        .await
}
