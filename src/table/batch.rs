use aws_sdk_dynamodb::types::{
    ConsumedCapacity, DeleteRequest, ItemCollectionMetrics, KeysAndAttributes, PutRequest,
    ReturnConsumedCapacity, ReturnItemCollectionMetrics, WriteRequest,
};
use futures_util::{StreamExt, TryStreamExt};
use serde_dynamo::{from_item, from_items, to_item};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::time::sleep;
use tokio_stream::{self as stream};

use crate::error::Error;
use crate::mapper::DynamoMapper;
use crate::table::DynamoTable;
use crate::table::helpers::keys::{KeyList, composite_key_of, key_for};
use crate::table::helpers::{batch_processor, retry_config};
use crate::table::types::{CompositeKey, Item, RetryConfig};
use crate::table::version::ItemLayout;

/// Batch write output containing comprehensive metrics and tracking
///
/// Tracks which items were successfully processed, which failed after retries,
/// execution time, and retry attempts.
#[must_use = "batch write results contain failed items and metrics that should be checked"]
#[derive(Debug)]
pub struct BatchWriteOutput<T> {
    /// Items successfully written (puts)
    pub processed_puts: Vec<T>,
    /// Items that failed to be written after all retry attempts
    pub failed_puts: Vec<T>,
    /// Items successfully deleted
    pub processed_deletes: Vec<T>,
    /// Items that failed to be deleted after all retry attempts
    pub failed_deletes: Vec<T>,
    /// Total execution time including all retries
    pub total_duration: Duration,
    /// Number of retry attempts made (0 means no retries needed)
    pub retry_count: usize,
    /// For each table, the item collections affected by the writes
    pub item_collection_metrics: HashMap<String, Vec<ItemCollectionMetrics>>,
    /// The capacity units consumed by every <code>BatchWriteItem</code> call
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

impl<T> BatchWriteOutput<T> {
    fn new() -> Self {
        Self {
            processed_puts: Vec::new(),
            failed_puts: Vec::new(),
            processed_deletes: Vec::new(),
            failed_deletes: Vec::new(),
            total_duration: Duration::ZERO,
            retry_count: 0,
            item_collection_metrics: HashMap::new(),
            consumed_capacity: Vec::new(),
        }
    }

    /// Check if all operations were successful
    pub fn is_success(&self) -> bool {
        self.failed_puts.is_empty() && self.failed_deletes.is_empty()
    }

    /// Get total number of items processed successfully
    pub fn processed_count(&self) -> usize {
        self.processed_puts.len() + self.processed_deletes.len()
    }

    /// Get total number of items that failed
    pub fn failed_count(&self) -> usize {
        self.failed_puts.len() + self.failed_deletes.len()
    }

    /// Get success rate as a percentage (0.0 to 100.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.processed_count() + self.failed_count();
        if total == 0 {
            return 100.0;
        }
        (self.processed_count() as f64 / total as f64) * 100.0
    }
}

/// Batch read output containing comprehensive metrics and tracking
#[must_use = "batch read results contain failed keys and metrics that should be checked"]
#[derive(Debug)]
pub struct BatchReadOutput<T: DynamoTable> {
    /// Items successfully retrieved
    pub items: Vec<T>,
    /// Keys that failed to be retrieved after all retry attempts
    pub failed_keys: Vec<CompositeKey<T::PK, T::SK>>,
    /// Total execution time including all retries
    pub total_duration: Duration,
    /// Number of retry attempts made (0 means no retries needed)
    pub retry_count: usize,
    /// The capacity units consumed by every <code>BatchGetItem</code> call
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

impl<T: DynamoTable> BatchReadOutput<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            failed_keys: Vec::new(),
            total_duration: Duration::ZERO,
            retry_count: 0,
            consumed_capacity: Vec::new(),
        }
    }

    /// Check if all operations were successful
    pub fn is_success(&self) -> bool {
        self.failed_keys.is_empty()
    }

    /// Get total number of items requested
    pub fn total_requested(&self) -> usize {
        self.items.len() + self.failed_keys.len()
    }

    /// Get success rate as a percentage (0.0 to 100.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requested();
        if total == 0 {
            return 100.0;
        }
        (self.items.len() as f64 / total as f64) * 100.0
    }
}

/// What one round of batch calls left behind
#[derive(Debug)]
struct RoundOutput<U> {
    unprocessed: Vec<U>,
    responses: Vec<Item>,
    item_collection_metrics: HashMap<String, Vec<ItemCollectionMetrics>>,
    consumed_capacity: Vec<ConsumedCapacity>,
}

impl<U> Default for RoundOutput<U> {
    fn default() -> Self {
        Self {
            unprocessed: Vec::new(),
            responses: Vec::new(),
            item_collection_metrics: HashMap::new(),
            consumed_capacity: Vec::new(),
        }
    }
}

impl<U> RoundOutput<U> {
    /// Merge everything but the leftovers of `round`, and hand the leftovers back
    fn absorb(&mut self, round: RoundOutput<U>) -> Vec<U> {
        self.responses.extend(round.responses);
        self.consumed_capacity.extend(round.consumed_capacity);
        for (table, metrics) in round.item_collection_metrics {
            self.item_collection_metrics
                .entry(table)
                .or_default()
                .extend(metrics);
        }
        round.unprocessed
    }
}

/// Send `pending` with `send_round` until nothing is left or the retries run out
///
/// Returns everything the rounds produced, with `unprocessed` holding what the
/// last round left behind, and the number of retries made.
async fn retry_rounds<U, F, Fut>(
    table_name: &str,
    operation: &'static str,
    mut pending: Vec<U>,
    retries: &RetryConfig,
    mut send_round: F,
) -> Result<(RoundOutput<U>, usize), Error>
where
    F: FnMut(Vec<U>) -> Fut,
    Fut: Future<Output = Result<RoundOutput<U>, Error>>,
{
    let mut merged = RoundOutput::default();
    let mut retry_count = 0;

    loop {
        let round = send_round(pending).await?;
        pending = merged.absorb(round);

        if pending.is_empty() || retry_count >= retries.max_retries {
            break;
        }

        let delay = retry_config::retry_delay(retry_count, retries);
        tracing::warn!(
            table = %table_name,
            operation,
            unprocessed = pending.len(),
            attempt = retry_count + 1,
            ?delay,
            "retrying unprocessed batch requests"
        );
        sleep(delay).await;
        retry_count += 1;
    }

    merged.unprocessed = pending;
    Ok((merged, retry_count))
}

/// Keys of the puts and deletes still in `requests`
fn failed_write_keys(
    layout: &ItemLayout,
    requests: Vec<WriteRequest>,
) -> Result<(KeyList, KeyList), Error> {
    let mut puts = KeyList::default();
    let mut deletes = KeyList::default();

    for request in requests {
        if let Some(put_request) = request.put_request {
            puts.push(layout.key_of(&put_request.item)?);
        }
        if let Some(delete_request) = request.delete_request {
            deletes.push(delete_request.key);
        }
    }

    Ok((puts, deletes))
}

/// Split `entries` into (processed, failed); each failed key claims one entry
fn split_processed<T>(entries: Vec<(Item, T)>, failed: &mut KeyList) -> (Vec<T>, Vec<T>) {
    let mut processed = Vec::with_capacity(entries.len());
    let mut unprocessed = Vec::new();

    for (key, value) in entries {
        if failed.take(&key) {
            unprocessed.push(value);
        } else {
            processed.push(value);
        }
    }

    (processed, unprocessed)
}

impl DynamoMapper {
    /// Put `items` with BatchWriteItem
    ///
    /// Batch writes never check versions; auto-generated keys are filled in.
    pub async fn batch_save<T>(&self, items: Vec<T>) -> Result<BatchWriteOutput<T>, Error>
    where
        T: DynamoTable + Clone,
    {
        self.batch_write(items, Vec::new()).await
    }

    /// Delete `items` with BatchWriteItem
    pub async fn batch_delete<T>(&self, items: Vec<T>) -> Result<BatchWriteOutput<T>, Error>
    where
        T: DynamoTable + Clone,
    {
        self.batch_write(Vec::new(), items).await
    }

    /// Batch write (put/delete) multiple items to a DynamoDB table
    ///
    /// Requests are chunked by 25 and sent concurrently. Unprocessed items
    /// are retried with exponential backoff and jitter, up to
    /// `RetryConfig::max_retries` times; what is still unprocessed after that
    /// ends up in `failed_puts` / `failed_deletes`.
    pub async fn batch_write<T>(
        &self,
        puts: Vec<T>,
        deletes: Vec<T>,
    ) -> Result<BatchWriteOutput<T>, Error>
    where
        T: DynamoTable + Clone,
    {
        let mut output = BatchWriteOutput::new();
        if puts.is_empty() && deletes.is_empty() {
            return Ok(output);
        }

        let start_time = Instant::now();
        let table_name = self.table_name::<T>();
        let layout = ItemLayout::of::<T>();
        let retries = self.batch_retries::<T>();

        let mut requests: Vec<WriteRequest> = Vec::with_capacity(puts.len() + deletes.len());
        let mut put_keys: Vec<(Item, T)> = Vec::with_capacity(puts.len());
        let mut delete_keys: Vec<(Item, T)> = Vec::with_capacity(deletes.len());

        for value in puts {
            let mut item: Item = to_item(&value)?;
            let value = if T::AUTO_GENERATED_KEY.is_some() {
                layout.fill_generated_key(&mut item);
                from_item(item.clone())?
            } else {
                value
            };

            put_keys.push((layout.key_of(&item)?, value));
            requests.push(
                WriteRequest::builder()
                    .put_request(PutRequest::builder().set_item(Some(item)).build()?)
                    .build(),
            );
        }

        for value in deletes {
            let key = layout.key_of(&to_item(&value)?)?;
            requests.push(
                WriteRequest::builder()
                    .delete_request(DeleteRequest::builder().set_key(Some(key.clone())).build()?)
                    .build(),
            );
            delete_keys.push((key, value));
        }

        let table = table_name.as_str();
        let (round, retry_count) =
            retry_rounds(table, "batch_write", requests, &retries, |requests| {
                self.batch_write_round(table, requests)
            })
            .await?;

        output.consumed_capacity = round.consumed_capacity;
        output.item_collection_metrics = round.item_collection_metrics;

        let (mut failed_put_keys, mut failed_delete_keys) =
            failed_write_keys(&layout, round.unprocessed)?;

        if failed_put_keys.len() + failed_delete_keys.len() > 0 {
            tracing::warn!(
                table = %table_name,
                failed_puts = failed_put_keys.len(),
                failed_deletes = failed_delete_keys.len(),
                retries = retry_count,
                "batch writes left unprocessed"
            );
        }

        (output.processed_puts, output.failed_puts) =
            split_processed(put_keys, &mut failed_put_keys);
        (output.processed_deletes, output.failed_deletes) =
            split_processed(delete_keys, &mut failed_delete_keys);

        output.total_duration = start_time.elapsed();
        output.retry_count = retry_count;

        Ok(output)
    }

    /// One BatchWriteItem call per chunk of 25, without retries
    async fn batch_write_round(
        &self,
        table_name: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<RoundOutput<WriteRequest>, Error> {
        let batches: Vec<Vec<WriteRequest>> = requests
            .chunks(batch_processor::BATCH_WRITE_SIZE)
            .map(|data| data.to_vec())
            .collect();

        tracing::debug!(table = %table_name, batches = batches.len(), "batch write");

        let concurrency = batch_processor::concurrency(batches.len());

        stream::iter(batches.into_iter().map(|batch| {
            self.client()
                .batch_write_item()
                .request_items(table_name, batch)
                .return_consumed_capacity(ReturnConsumedCapacity::Total)
                .return_item_collection_metrics(ReturnItemCollectionMetrics::Size)
                .send()
        }))
        .buffer_unordered(concurrency)
        .map_err(Into::<Error>::into)
        .try_fold(RoundOutput::default(), |mut round, result| async move {
            if let Some(unprocessed_items) = result.unprocessed_items {
                for items in unprocessed_items.into_values() {
                    round.unprocessed.extend(items);
                }
            }

            if let Some(item_collection_metrics) = result.item_collection_metrics {
                for (table, values) in item_collection_metrics {
                    round
                        .item_collection_metrics
                        .entry(table)
                        .or_default()
                        .extend(values);
                }
            }

            if let Some(capacities) = result.consumed_capacity {
                round.consumed_capacity.extend(capacities);
            }

            Ok(round)
        })
        .await
    }

    /// Batch retrieve multiple items by key
    ///
    /// Keys are chunked by 100 and read concurrently, consistently when the
    /// mapper is configured for consistent reads. Items come back in no
    /// particular order; keys that match no item are simply absent.
    pub async fn batch_load<T: DynamoTable>(
        &self,
        keys: Vec<CompositeKey<T::PK, T::SK>>,
    ) -> Result<BatchReadOutput<T>, Error> {
        let mut output = BatchReadOutput::new();
        if keys.is_empty() {
            return Ok(output);
        }

        let start_time = Instant::now();
        let table_name = self.table_name::<T>();
        let retries = self.batch_retries::<T>();

        let pending = keys
            .iter()
            .map(|(partition_key, sort_key)| {
                key_for::<T>(&table_name, partition_key, sort_key.as_ref())
            })
            .collect::<Result<Vec<Item>, Error>>()?;

        let table = table_name.as_str();
        let (round, retry_count) =
            retry_rounds(table, "batch_get", pending, &retries, |pending| {
                self.batch_load_round(table, pending)
            })
            .await?;

        output.items = from_items(round.responses)?;
        output.consumed_capacity = round.consumed_capacity;

        if !round.unprocessed.is_empty() {
            tracing::warn!(
                table = %table_name,
                failed_keys = round.unprocessed.len(),
                retries = retry_count,
                "batch reads left unprocessed"
            );
        }

        for key in &round.unprocessed {
            if let Some(key) = composite_key_of::<T>(key)? {
                output.failed_keys.push(key);
            }
        }

        output.total_duration = start_time.elapsed();
        output.retry_count = retry_count;

        Ok(output)
    }

    /// One BatchGetItem call per chunk of 100, without retries
    async fn batch_load_round(
        &self,
        table_name: &str,
        keys: Vec<Item>,
    ) -> Result<RoundOutput<Item>, Error> {
        let consistent_read = self.config().consistent_reads.as_bool();

        let batches: Vec<KeysAndAttributes> = keys
            .chunks(batch_processor::BATCH_READ_SIZE)
            .map(|data| {
                KeysAndAttributes::builder()
                    .set_keys(Some(data.to_vec()))
                    .consistent_read(consistent_read)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(table = %table_name, batches = batches.len(), "batch get");

        let concurrency = batch_processor::concurrency(batches.len());

        stream::iter(batches.into_iter().map(|batch| {
            self.client()
                .batch_get_item()
                .request_items(table_name, batch)
                .return_consumed_capacity(ReturnConsumedCapacity::Total)
                .send()
        }))
        .buffer_unordered(concurrency)
        .map_err(Into::<Error>::into)
        .try_fold(RoundOutput::default(), |mut round, result| async move {
            if let Some(responses) = result.responses {
                for items in responses.into_values() {
                    round.responses.extend(items);
                }
            }

            if let Some(unprocessed_keys) = result.unprocessed_keys {
                for keys_and_attributes in unprocessed_keys.into_values() {
                    round.unprocessed.extend(keys_and_attributes.keys);
                }
            }

            if let Some(capacities) = result.consumed_capacity {
                round.consumed_capacity.extend(capacities);
            }

            Ok(round)
        })
        .await
    }

    fn batch_retries<T: DynamoTable>(&self) -> RetryConfig {
        self.config()
            .batch_retries
            .clone()
            .unwrap_or(T::BATCH_RETRIES_CONFIG)
    }
}
