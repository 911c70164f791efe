/// Test helpers and fixtures for mapper integration tests
///
/// These tests need a DynamoDB endpoint. Run them against LocalStack with
/// `AWS_PROFILE=localstack cargo test -- --ignored`.
pub mod fixtures;

pub use dynamo_mapper::table::DynamoTable;
pub use dynamo_mapper::{ConsistentReads, DynamoMapper, MapperConfig, setup};
pub use serde::{Deserialize, Serialize};

// Re-export common fixtures
pub use fixtures::{Counter, Document, Order};

use tokio::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Ensure DynamoDB client and tracing are initialized for tests
static TEST_INIT: OnceCell<()> = OnceCell::const_new();

/// Initialize tracing and the DynamoDB client for tests (idempotent)
pub async fn init_test_client() {
    TEST_INIT
        .get_or_init(|| async {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();

            // Trigger auto-initialization
            let _ = dynamo_mapper::dynamodb_client().await;
        })
        .await;
}

/// A partition key no other test run uses
pub fn unique_key(name: &str) -> String {
    format!("{name}_{}", rusty_ulid::generate_ulid_string())
}

/// Mapper with strongly consistent reads and `config` otherwise
///
/// Global secondary indexes stay eventually consistent.
#[allow(dead_code)]
pub async fn consistent_mapper(config: MapperConfig) -> DynamoMapper {
    init_test_client().await;
    dynamo_mapper::dynamo_mapper()
        .await
        .with_config(config.with_consistent_reads(ConsistentReads::Consistent))
}

/// Wait for eventual consistency
///
/// Global secondary indexes and scans may not immediately reflect recent writes.
#[allow(dead_code)]
pub async fn wait_for_consistency() {
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}

/// Setup a DynamoDB table for testing
///
/// Creates the table and its indexes if it doesn't exist. Safe to call multiple times.
#[allow(dead_code)]
pub async fn setup_table<T: DynamoTable>() -> Result<(), dynamo_mapper::Error> {
    init_test_client().await;
    let _ = setup::create_table::<T>().await?;
    Ok(())
}
