//! Per-mapper behaviour switches.

use crate::table::RetryConfig;

/// How `save` writes an item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaveBehavior {
    /// UpdateItem: set every modelled attribute, remove the ones that are null
    #[default]
    Update,
    /// UpdateItem: set non-null attributes, leave null ones untouched
    UpdateSkipNullAttributes,
    /// Like `UpdateSkipNullAttributes`, but set attributes are added to the stored sets
    AppendSet,
    /// PutItem of the whole item, with the version check
    Put,
    /// PutItem of the whole item, without the version check
    Clobber,
}

impl SaveBehavior {
    /// Whether optimistic locking conditions are attached to writes
    pub fn checks_version(self) -> bool {
        self != SaveBehavior::Clobber
    }
}

/// Read consistency for loads, queries and scans
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsistentReads {
    /// Eventually consistent reads
    #[default]
    Eventual,
    /// Strongly consistent reads
    Consistent,
}

impl ConsistentReads {
    pub(crate) fn as_bool(self) -> bool {
        self == ConsistentReads::Consistent
    }
}

/// How a paginated list fetches its pages
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaginationLoadingStrategy {
    /// Pages are fetched on demand and kept
    #[default]
    LazyLoading,
    /// Every page is fetched up front
    EagerLoading,
    /// Pages are fetched on demand and dropped once iterated; one pass only
    IterationOnly,
}

impl PaginationLoadingStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lazy" | "lazy_loading" => Some(Self::LazyLoading),
            "eager" | "eager_loading" => Some(Self::EagerLoading),
            "iteration" | "iteration_only" => Some(Self::IterationOnly),
            _ => None,
        }
    }
}

/// Rewrites the table name declared by a `DynamoTable`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableNameOverride {
    /// Prepend a prefix, e.g. `staging_`
    Prefix(String),
    /// Use this name for every table
    Replacement(String),
}

/// Mapper configuration
///
/// ```
/// use dynamo_mapper::{ConsistentReads, MapperConfig, SaveBehavior, TableNameOverride};
///
/// let config = MapperConfig::default()
///     .with_save_behavior(SaveBehavior::Clobber)
///     .with_consistent_reads(ConsistentReads::Consistent)
///     .with_table_name_override(TableNameOverride::Prefix("dev_".into()));
///
/// assert_eq!(config.table_name("users"), "dev_users");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapperConfig {
    /// Write behaviour of `save`
    pub save_behavior: SaveBehavior,
    /// Read consistency
    pub consistent_reads: ConsistentReads,
    /// Paginated list strategy
    pub pagination_loading_strategy: PaginationLoadingStrategy,
    /// Table name rewrite
    pub table_name_override: Option<TableNameOverride>,
    /// Batch retry policy; falls back to the table's `BATCH_RETRIES_CONFIG`
    pub batch_retries: Option<RetryConfig>,
}

impl MapperConfig {
    /// Environment variable holding a table name prefix
    pub const TABLE_PREFIX_ENV: &'static str = "DYNAMO_MAPPER_TABLE_PREFIX";
    /// Environment variable switching on consistent reads (`true`/`1`)
    pub const CONSISTENT_READS_ENV: &'static str = "DYNAMO_MAPPER_CONSISTENT_READS";
    /// Environment variable choosing the pagination strategy (`lazy`, `eager`, `iteration`)
    pub const PAGINATION_ENV: &'static str = "DYNAMO_MAPPER_PAGINATION";

    /// Default configuration adjusted by the `DYNAMO_MAPPER_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(prefix) = lookup(Self::TABLE_PREFIX_ENV).filter(|p| !p.is_empty()) {
            config.table_name_override = Some(TableNameOverride::Prefix(prefix));
        }

        if let Some(value) = lookup(Self::CONSISTENT_READS_ENV) {
            if matches!(value.trim(), "1" | "true" | "TRUE" | "True") {
                config.consistent_reads = ConsistentReads::Consistent;
            }
        }

        if let Some(value) = lookup(Self::PAGINATION_ENV) {
            match PaginationLoadingStrategy::parse(&value) {
                Some(strategy) => config.pagination_loading_strategy = strategy,
                None => tracing::warn!(
                    value = %value,
                    "ignoring unknown {}",
                    Self::PAGINATION_ENV
                ),
            }
        }

        config
    }

    /// Set the save behaviour
    pub fn with_save_behavior(mut self, save_behavior: SaveBehavior) -> Self {
        self.save_behavior = save_behavior;
        self
    }

    /// Set the read consistency
    pub fn with_consistent_reads(mut self, consistent_reads: ConsistentReads) -> Self {
        self.consistent_reads = consistent_reads;
        self
    }

    /// Set the pagination strategy
    pub fn with_pagination_loading_strategy(
        mut self,
        strategy: PaginationLoadingStrategy,
    ) -> Self {
        self.pagination_loading_strategy = strategy;
        self
    }

    /// Set the table name rewrite
    pub fn with_table_name_override(mut self, table_name_override: TableNameOverride) -> Self {
        self.table_name_override = Some(table_name_override);
        self
    }

    /// Set the batch retry policy
    pub fn with_batch_retries(mut self, retries: RetryConfig) -> Self {
        self.batch_retries = Some(retries);
        self
    }

    /// Table name after the override is applied
    pub fn table_name(&self, declared: &str) -> String {
        match &self.table_name_override {
            Some(TableNameOverride::Prefix(prefix)) => format!("{prefix}{declared}"),
            Some(TableNameOverride::Replacement(name)) => name.clone(),
            None => declared.to_string(),
        }
    }
}
