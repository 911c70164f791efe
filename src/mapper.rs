use aws_sdk_dynamodb::Client;

use crate::config::MapperConfig;
use crate::table::DynamoTable;

/// Maps `DynamoTable` records to DynamoDB items
///
/// Cheap to clone: the client is reference counted.
///
/// ```no_run
/// use dynamo_mapper::{DynamoMapper, MapperConfig, SaveBehavior};
///
/// # async fn example() {
/// let config = aws_config::load_from_env().await;
/// let mapper = DynamoMapper::new(
///     aws_sdk_dynamodb::Client::new(&config),
///     MapperConfig::default().with_save_behavior(SaveBehavior::Clobber),
/// );
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DynamoMapper {
    client: Client,
    config: MapperConfig,
}

impl DynamoMapper {
    /// Mapper over `client`
    pub fn new(client: Client, config: MapperConfig) -> Self {
        Self { client, config }
    }

    /// Same client, different configuration
    pub fn with_config(&self, config: MapperConfig) -> Self {
        Self {
            client: self.client.clone(),
            config,
        }
    }

    /// Underlying SDK client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Active configuration
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Table name of `T` after the configured override
    pub fn table_name<T: DynamoTable>(&self) -> String {
        self.config.table_name(T::TABLE)
    }
}
