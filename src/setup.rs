use aws_sdk_dynamodb::operation::create_table::builders::CreateTableFluentBuilder;
use aws_sdk_dynamodb::operation::create_table::{CreateTableError, CreateTableOutput};
use aws_sdk_dynamodb::operation::delete_table::{DeleteTableError, DeleteTableOutput};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, GlobalSecondaryIndex, KeySchemaElement, KeyType, LocalSecondaryIndex,
    ProvisionedThroughput,
};

use crate::error::Error;
use crate::mapper::DynamoMapper;
use crate::schema::KeyAttribute;
use crate::table::DynamoTable;

const READ_CAPACITY_UNITS: i64 = 10;
const WRITE_CAPACITY_UNITS: i64 = 10;

/// CreateTable request shape derived from a `DynamoTable`
///
/// Attribute definitions are deduplicated across the table and its indexes.
#[derive(Clone, Debug, PartialEq)]
pub struct TableDefinition {
    /// Every key attribute of the table and its indexes
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Table HASH and RANGE keys
    pub key_schema: Vec<KeySchemaElement>,
    /// Global secondary indexes
    pub global_secondary_indexes: Vec<GlobalSecondaryIndex>,
    /// Local secondary indexes
    pub local_secondary_indexes: Vec<LocalSecondaryIndex>,
    /// Table throughput
    pub provisioned_throughput: ProvisionedThroughput,
}

impl TableDefinition {
    /// Derive the definition of `T`
    pub fn of<T: DynamoTable>() -> Result<Self, Error> {
        let hash_key = KeyAttribute {
            name: T::PARTITION_KEY,
            attribute_type: T::PARTITION_KEY_TYPE,
        };
        let range_key = T::SORT_KEY.map(|name| KeyAttribute {
            name,
            attribute_type: T::SORT_KEY_TYPE,
        });

        let mut definition = Self {
            attribute_definitions: Vec::new(),
            key_schema: key_schema(hash_key.name, range_key.map(|key| key.name))?,
            global_secondary_indexes: Vec::new(),
            local_secondary_indexes: Vec::new(),
            provisioned_throughput: throughput()?,
        };

        definition.define(hash_key)?;
        if let Some(range_key) = range_key {
            definition.define(range_key)?;
        }

        for index in T::INDEXES {
            if let Some(range_key) = index.range_key {
                definition.define(range_key)?;
            }

            if index.is_global() {
                let Some(index_hash_key) = index.hash_key else {
                    continue;
                };
                definition.define(index_hash_key)?;

                definition.global_secondary_indexes.push(
                    GlobalSecondaryIndex::builder()
                        .index_name(index.name)
                        .set_key_schema(Some(key_schema(
                            index_hash_key.name,
                            index.range_key.map(|key| key.name),
                        )?))
                        .projection(index.projection.to_projection())
                        .provisioned_throughput(throughput()?)
                        .build()?,
                );
            } else if let Some(index_range_key) = index.range_key {
                definition.local_secondary_indexes.push(
                    LocalSecondaryIndex::builder()
                        .index_name(index.name)
                        .set_key_schema(Some(key_schema(
                            hash_key.name,
                            Some(index_range_key.name),
                        )?))
                        .projection(index.projection.to_projection())
                        .build()?,
                );
            }
        }

        Ok(definition)
    }

    fn define(&mut self, attribute: KeyAttribute) -> Result<(), Error> {
        if self
            .attribute_definitions
            .iter()
            .any(|definition| definition.attribute_name() == attribute.name)
        {
            return Ok(());
        }

        self.attribute_definitions.push(
            AttributeDefinition::builder()
                .attribute_name(attribute.name)
                .attribute_type(attribute.attribute_type.scalar())
                .build()?,
        );
        Ok(())
    }

    fn apply(self, builder: CreateTableFluentBuilder) -> CreateTableFluentBuilder {
        builder
            .set_attribute_definitions(Some(self.attribute_definitions))
            .set_key_schema(Some(self.key_schema))
            .set_global_secondary_indexes(
                (!self.global_secondary_indexes.is_empty())
                    .then_some(self.global_secondary_indexes),
            )
            .set_local_secondary_indexes(
                (!self.local_secondary_indexes.is_empty()).then_some(self.local_secondary_indexes),
            )
            .provisioned_throughput(self.provisioned_throughput)
    }
}

fn key_schema(hash_key: &str, range_key: Option<&str>) -> Result<Vec<KeySchemaElement>, Error> {
    let mut schema = vec![
        KeySchemaElement::builder()
            .attribute_name(hash_key)
            .key_type(KeyType::Hash)
            .build()?,
    ];

    if let Some(range_key) = range_key {
        schema.push(
            KeySchemaElement::builder()
                .attribute_name(range_key)
                .key_type(KeyType::Range)
                .build()?,
        );
    }

    Ok(schema)
}

fn throughput() -> Result<ProvisionedThroughput, Error> {
    Ok(ProvisionedThroughput::builder()
        .read_capacity_units(READ_CAPACITY_UNITS)
        .write_capacity_units(WRITE_CAPACITY_UNITS)
        .build()?)
}

impl DynamoMapper {
    /// Create the table of `T`, succeeding when it already exists
    pub async fn create_table<T: DynamoTable>(&self) -> Result<CreateTableOutput, Error> {
        let table_name = self.table_name::<T>();
        let builder = self.client().create_table().table_name(&table_name);

        match TableDefinition::of::<T>()?.apply(builder).send().await {
            Ok(output) => {
                tracing::info!(table = %table_name, "table created");
                Ok(output)
            }
            Err(e) => {
                if let Some(CreateTableError::ResourceInUseException(_)) = e.as_service_error() {
                    tracing::info!(table = %table_name, "table already exists");
                    return Ok(CreateTableOutput::builder().build());
                }
                Err(e.into())
            }
        }
    }

    /// Delete the table of `T`, succeeding when it does not exist
    pub async fn delete_table<T: DynamoTable>(&self) -> Result<DeleteTableOutput, Error> {
        let table_name = self.table_name::<T>();

        match self.client().delete_table().table_name(&table_name).send().await {
            Ok(output) => {
                tracing::info!(table = %table_name, "table deleted");
                Ok(output)
            }
            Err(e) => {
                if let Some(DeleteTableError::ResourceNotFoundException(_)) = e.as_service_error() {
                    tracing::info!(table = %table_name, "table did not exist");
                    return Ok(DeleteTableOutput::builder().build());
                }
                Err(e.into())
            }
        }
    }
}

/// Create the table of `T` with its mapper
///
/// Uses the global mapper unless `T` overrides [`DynamoTable::mapper`],
/// which makes it convenient in tests and examples.
pub async fn create_table<T: DynamoTable>() -> Result<CreateTableOutput, Error> {
    T::mapper().await.create_table::<T>().await
}

/// Delete the table of `T` with its mapper
pub async fn delete_table<T: DynamoTable>() -> Result<DeleteTableOutput, Error> {
    T::mapper().await.delete_table::<T>().await
}
