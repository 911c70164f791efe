//! Common test fixtures and data structures
//!
//! Defines reusable test models that implement DynamoTable for use across
//! multiple test files.
#![allow(dead_code)]

use super::{Deserialize, DynamoTable, Serialize};
use dynamo_mapper::schema::{AttributeType, IndexSchema, KeyAttribute};
use dynamo_mapper::table::SortKey;

/// Orders of a user, with a global index on status and a local index on total
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Order {
    pub user_id: String,
    pub order_id: String,
    pub status: String,
    pub total: u32,
}

impl DynamoTable for Order {
    type PK = String;
    type SK = String;
    const TABLE: &'static str = "tests_mapper_orders";
    const PARTITION_KEY: &'static str = "user_id";
    const SORT_KEY: Option<&'static str> = Some("order_id");
    const INDEXES: &'static [IndexSchema] = &[
        IndexSchema::global("by-status", KeyAttribute::string("status"))
            .with_range_key(KeyAttribute::number("total")),
        IndexSchema::local("by-total", KeyAttribute::number("total")),
    ];

    fn partition_key(&self) -> String {
        self.user_id.clone()
    }

    fn sort_key(&self) -> SortKey<String> {
        Some(self.order_id.clone())
    }
}

impl Order {
    pub fn new(user_id: &str, order_id: &str, status: &str, total: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            order_id: order_id.to_string(),
            status: status.to_string(),
            total,
        }
    }
}

/// Versioned document with a generated id
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub version: Option<u64>,
}

impl DynamoTable for Document {
    type PK = String;
    type SK = String;
    const TABLE: &'static str = "tests_mapper_documents";
    const PARTITION_KEY: &'static str = "id";
    const VERSION_ATTRIBUTE: Option<&'static str> = Some("version");
    const AUTO_GENERATED_KEY: Option<&'static str> = Some("id");

    fn partition_key(&self) -> String {
        self.id.clone()
    }
}

/// Counters keyed by a number
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Counter {
    pub shard: u32,
    pub hits: i64,
    pub misses: i64,
}

impl DynamoTable for Counter {
    type PK = u32;
    type SK = String;
    const TABLE: &'static str = "tests_mapper_counters";
    const PARTITION_KEY: &'static str = "shard";
    const PARTITION_KEY_TYPE: AttributeType = AttributeType::N;

    fn partition_key(&self) -> u32 {
        self.shard
    }
}
