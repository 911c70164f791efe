use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::query::builders::QueryFluentBuilder;
use aws_sdk_dynamodb::operation::scan::builders::ScanFluentBuilder;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnConsumedCapacity, Select};
use aws_smithy_types_convert::stream::PaginationStreamExt;
use futures_util::future::{BoxFuture, Either, try_join_all};
use futures_util::{TryStreamExt, stream};
use serde_dynamo::from_item;
use std::collections::HashMap;
use std::marker::PhantomData;
use tokio_stream::Stream;

use crate::config::MapperConfig;
use crate::error::Error;
use crate::mapper::DynamoMapper;
use crate::schema::TableKeySchema;
use crate::table::DynamoTable;
use crate::table::condition::{ExpressionBuilder, and_expressions};
use crate::table::expression::{QueryExpression, ScanExpression};
use crate::table::paginated::{PageSource, PaginatedList};
use crate::table::resolver::resolve_key_conditions;
use crate::table::types::{Item, ResultPage};

/// Fully resolved Query request
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct QueryRequest {
    pub(crate) table_name: String,
    pub(crate) index_name: Option<String>,
    pub(crate) key_condition_expression: String,
    pub(crate) filter_expression: Option<String>,
    pub(crate) names: Option<HashMap<String, String>>,
    pub(crate) values: Option<HashMap<String, AttributeValue>>,
    pub(crate) projection_expression: Option<String>,
    pub(crate) select: Option<Select>,
    pub(crate) scan_index_forward: bool,
    pub(crate) consistent_read: bool,
    pub(crate) limit: Option<i32>,
    pub(crate) exclusive_start_key: Option<Item>,
}

impl QueryRequest {
    pub(crate) fn new<T: DynamoTable>(
        config: &MapperConfig,
        expression: &QueryExpression<T>,
    ) -> Result<Self, Error> {
        let schema = TableKeySchema::of::<T>();
        let resolved = resolve_key_conditions(
            &schema,
            &expression.hash_key_values,
            &expression.range_key_conditions,
            expression.index_name.as_deref(),
            expression.consistent_read.unwrap_or(false),
        )?;

        let on_global_index = is_global_index(&schema, resolved.index_name.as_deref());
        let consistent_read = expression
            .consistent_read
            .unwrap_or_else(|| config.consistent_reads.as_bool() && !on_global_index);

        let mut builder = ExpressionBuilder::new();
        let key_condition_expression = resolved
            .conditions
            .iter()
            .map(|(attribute, condition)| condition.render(attribute, &mut builder))
            .collect::<Result<Vec<_>, Error>>()?
            .join(" AND ");

        let filter =
            builder.conditions(&expression.query_filter, expression.conditional_operator)?;
        let filter_expression = and_expressions(filter, expression.raw.expression.clone());
        builder.merge_user(&expression.raw.names, &expression.raw.values)?;
        let (names, values) = builder.into_parts();

        let select = select_for(
            expression.projection_expression.is_some(),
            resolved.index_name.is_some(),
        );

        Ok(Self {
            table_name: config.table_name(T::TABLE),
            index_name: resolved.index_name,
            key_condition_expression,
            filter_expression,
            names,
            values,
            projection_expression: expression.projection_expression.clone(),
            select,
            scan_index_forward: expression.scan_index_forward,
            consistent_read,
            limit: expression.limit.or(Some(i32::from(T::DEFAULT_PAGE_SIZE))),
            exclusive_start_key: expression.exclusive_start_key.clone(),
        })
    }

    fn builder(&self, client: &Client) -> QueryFluentBuilder {
        client
            .query()
            .table_name(&self.table_name)
            .set_index_name(self.index_name.clone())
            .key_condition_expression(&self.key_condition_expression)
            .set_filter_expression(self.filter_expression.clone())
            .set_expression_attribute_names(self.names.clone())
            .set_expression_attribute_values(self.values.clone())
            .set_projection_expression(self.projection_expression.clone())
            .set_select(self.select.clone())
            .scan_index_forward(self.scan_index_forward)
            .consistent_read(self.consistent_read)
            .set_limit(self.limit)
            .set_exclusive_start_key(self.exclusive_start_key.clone())
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
    }

    async fn fetch<T: DynamoTable>(&self, client: &Client) -> Result<ResultPage<T>, Error> {
        if self.limit == Some(0) {
            return Ok(ResultPage::default());
        }

        tracing::debug!(
            table = %self.table_name,
            index = ?self.index_name,
            key_condition = %self.key_condition_expression,
            "query"
        );

        let output = self.builder(client).send().await?;

        ResultPage::from_raw(
            output.items,
            output.count,
            output.scanned_count,
            output.last_evaluated_key,
            output.consumed_capacity,
        )
    }
}

/// Fully resolved Scan request
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ScanRequest {
    pub(crate) table_name: String,
    pub(crate) index_name: Option<String>,
    pub(crate) filter_expression: Option<String>,
    pub(crate) names: Option<HashMap<String, String>>,
    pub(crate) values: Option<HashMap<String, AttributeValue>>,
    pub(crate) projection_expression: Option<String>,
    pub(crate) select: Option<Select>,
    pub(crate) consistent_read: bool,
    pub(crate) limit: Option<i32>,
    pub(crate) exclusive_start_key: Option<Item>,
    pub(crate) segment: Option<i32>,
    pub(crate) total_segments: Option<i32>,
}

impl ScanRequest {
    pub(crate) fn new<T: DynamoTable>(
        config: &MapperConfig,
        expression: &ScanExpression,
    ) -> Result<Self, Error> {
        let schema = TableKeySchema::of::<T>();

        if let Some(name) = expression.index_name.as_deref() {
            if schema.indexes().get(name).is_none() {
                return Err(Error::InvalidQuery(format!(
                    "index {name} is not declared on the table"
                )));
            }
        }

        let on_global_index = is_global_index(&schema, expression.index_name.as_deref());
        if on_global_index && expression.consistent_read == Some(true) {
            return Err(Error::InvalidQuery(
                "Consistent reads are not supported on global secondary indexes".to_string(),
            ));
        }
        let consistent_read = expression
            .consistent_read
            .unwrap_or_else(|| config.consistent_reads.as_bool() && !on_global_index);

        match (expression.segment, expression.total_segments) {
            (_, Some(total)) if total < 1 => {
                return Err(Error::InvalidQuery(format!(
                    "total segments must be at least 1, got {total}"
                )));
            }
            (Some(segment), Some(total)) if segment < 0 || segment >= total => {
                return Err(Error::InvalidQuery(format!(
                    "segment {segment} is out of range for {total} segments"
                )));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::InvalidQuery(
                    "segment and total segments must be given together".to_string(),
                ));
            }
            _ => {}
        }

        let mut builder = ExpressionBuilder::new();
        let filter =
            builder.conditions(&expression.scan_filter, expression.conditional_operator)?;
        let filter_expression = and_expressions(filter, expression.raw.expression.clone());
        builder.merge_user(&expression.raw.names, &expression.raw.values)?;
        let (names, values) = builder.into_parts();

        Ok(Self {
            table_name: config.table_name(T::TABLE),
            index_name: expression.index_name.clone(),
            filter_expression,
            names,
            values,
            projection_expression: expression.projection_expression.clone(),
            select: select_for(
                expression.projection_expression.is_some(),
                expression.index_name.is_some(),
            ),
            consistent_read,
            limit: expression.limit.or(Some(i32::from(T::DEFAULT_PAGE_SIZE))),
            exclusive_start_key: expression.exclusive_start_key.clone(),
            segment: expression.segment,
            total_segments: expression.total_segments,
        })
    }

    /// The same scan restricted to one segment
    fn for_segment(&self, segment: i32, total_segments: i32) -> Self {
        Self {
            segment: Some(segment),
            total_segments: Some(total_segments),
            exclusive_start_key: None,
            ..self.clone()
        }
    }

    fn builder(&self, client: &Client) -> ScanFluentBuilder {
        client
            .scan()
            .table_name(&self.table_name)
            .set_index_name(self.index_name.clone())
            .set_filter_expression(self.filter_expression.clone())
            .set_expression_attribute_names(self.names.clone())
            .set_expression_attribute_values(self.values.clone())
            .set_projection_expression(self.projection_expression.clone())
            .set_select(self.select.clone())
            .consistent_read(self.consistent_read)
            .set_limit(self.limit)
            .set_exclusive_start_key(self.exclusive_start_key.clone())
            .set_segment(self.segment)
            .set_total_segments(self.total_segments)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
    }

    async fn fetch<T: DynamoTable>(&self, client: &Client) -> Result<ResultPage<T>, Error> {
        if self.limit == Some(0) {
            return Ok(ResultPage::default());
        }

        tracing::debug!(
            table = %self.table_name,
            index = ?self.index_name,
            segment = ?self.segment,
            "scan"
        );

        let output = self.builder(client).send().await?;

        ResultPage::from_raw(
            output.items,
            output.count,
            output.scanned_count,
            output.last_evaluated_key,
            output.consumed_capacity,
        )
    }
}

fn is_global_index(schema: &TableKeySchema, index_name: Option<&str>) -> bool {
    index_name
        .and_then(|name| schema.indexes().get(name))
        .map(|index| index.is_global())
        .unwrap_or(false)
}

// Only the base table can return all attributes; an explicit projection picks its own.
fn select_for(has_projection: bool, on_index: bool) -> Option<Select> {
    match (has_projection, on_index) {
        (true, _) => None,
        (false, true) => Some(Select::AllProjectedAttributes),
        (false, false) => Some(Select::AllAttributes),
    }
}

/// Follows the last evaluated key of a query
struct QuerySource<T> {
    client: Client,
    request: QueryRequest,
    done: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T: DynamoTable> PageSource<T> for QuerySource<T> {
    fn next_page(&mut self) -> BoxFuture<'_, Result<Option<ResultPage<T>>, Error>> {
        Box::pin(async move {
            if self.done {
                return Ok(None);
            }

            let page = self.request.fetch::<T>(&self.client).await?;
            self.request.exclusive_start_key = page.last_evaluated_key.clone();
            self.done = !page.has_more();

            Ok(Some(page))
        })
    }
}

/// Follows the last evaluated key of a scan, or of one segment of it
struct ScanSource<T> {
    client: Client,
    request: ScanRequest,
    done: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T> ScanSource<T> {
    fn new(client: Client, request: ScanRequest) -> Self {
        Self {
            client,
            request,
            done: false,
            _item: PhantomData,
        }
    }
}

impl<T: DynamoTable> PageSource<T> for ScanSource<T> {
    fn next_page(&mut self) -> BoxFuture<'_, Result<Option<ResultPage<T>>, Error>> {
        Box::pin(async move {
            if self.done {
                return Ok(None);
            }

            let page = self.request.fetch::<T>(&self.client).await?;
            self.request.exclusive_start_key = page.last_evaluated_key.clone();
            self.done = !page.has_more();

            Ok(Some(page))
        })
    }
}

/// One page of every unfinished segment per fetch, merged in segment order
struct ParallelScanSource<T> {
    segments: Vec<ScanSource<T>>,
}

impl<T: DynamoTable> PageSource<T> for ParallelScanSource<T> {
    fn next_page(&mut self) -> BoxFuture<'_, Result<Option<ResultPage<T>>, Error>> {
        Box::pin(async move {
            let pending: Vec<_> = self
                .segments
                .iter_mut()
                .filter(|segment| !segment.done)
                .map(|segment| segment.next_page())
                .collect();

            if pending.is_empty() {
                return Ok(None);
            }

            let mut merged = ResultPage::default();
            for page in try_join_all(pending).await?.into_iter().flatten() {
                merged.count += page.count;
                merged.scanned_count += page.scanned_count;
                merged.items.extend(page.items);
            }

            Ok(Some(merged))
        })
    }
}

impl DynamoMapper {
    /// Query into a paginated list
    ///
    /// The table or index is inferred from the hash key values and range key
    /// condition of the expression; see [`QueryExpression`].
    pub async fn query<T: DynamoTable>(
        &self,
        expression: &QueryExpression<T>,
    ) -> Result<PaginatedList<T>, Error> {
        let source = QuerySource {
            client: self.client().clone(),
            request: QueryRequest::new(self.config(), expression)?,
            done: false,
            _item: PhantomData,
        };

        PaginatedList::new(Box::new(source), self.config().pagination_loading_strategy).await
    }

    /// A single Query call
    ///
    /// Pass the returned `last_evaluated_key` back as the exclusive start key
    /// to fetch the next page.
    pub async fn query_page<T: DynamoTable>(
        &self,
        expression: &QueryExpression<T>,
    ) -> Result<ResultPage<T>, Error> {
        QueryRequest::new(self.config(), expression)?
            .fetch(self.client())
            .await
    }

    /// Every query result as a stream, driven by the SDK paginator
    pub fn query_stream<T: DynamoTable>(
        &self,
        expression: &QueryExpression<T>,
    ) -> Result<impl Stream<Item = Result<T, Error>> + use<T>, Error> {
        let request = QueryRequest::new(self.config(), expression)?;

        if request.limit == Some(0) {
            return Ok(Either::Left(stream::empty()));
        }

        Ok(Either::Right(
            request
                .builder(self.client())
                .into_paginator()
                .items()
                .send()
                .into_stream_03x()
                .map_err(Into::<Error>::into)
                .and_then(|item| async { from_item(item).map_err(Into::into) }),
        ))
    }

    /// Number of items matching the query, over every page
    pub async fn count_query<T: DynamoTable>(
        &self,
        expression: &QueryExpression<T>,
    ) -> Result<usize, Error> {
        let request = QueryRequest::new(self.config(), expression)?;

        tracing::debug!(table = %request.table_name, index = ?request.index_name, "count query");

        request
            .builder(self.client())
            .select(Select::Count)
            .set_projection_expression(None)
            .set_limit(None)
            .into_paginator()
            .send()
            .into_stream_03x()
            .map_err(Into::<Error>::into)
            .try_fold(0usize, |total, page| async move {
                Ok(total + page.count as usize)
            })
            .await
    }

    /// Scan into a paginated list
    pub async fn scan<T: DynamoTable>(
        &self,
        expression: &ScanExpression,
    ) -> Result<PaginatedList<T>, Error> {
        let request = ScanRequest::new::<T>(self.config(), expression)?;
        let source = ScanSource::<T>::new(self.client().clone(), request);

        PaginatedList::new(Box::new(source), self.config().pagination_loading_strategy).await
    }

    /// A single Scan call
    pub async fn scan_page<T: DynamoTable>(
        &self,
        expression: &ScanExpression,
    ) -> Result<ResultPage<T>, Error> {
        ScanRequest::new::<T>(self.config(), expression)?
            .fetch(self.client())
            .await
    }

    /// Scan `total_segments` segments side by side
    ///
    /// Each page of the returned list holds one page of every segment that
    /// still has results, in segment order.
    pub async fn parallel_scan<T: DynamoTable>(
        &self,
        expression: &ScanExpression,
        total_segments: i32,
    ) -> Result<PaginatedList<T>, Error> {
        if total_segments < 1 {
            return Err(Error::InvalidQuery(format!(
                "a parallel scan needs at least one segment, got {total_segments}"
            )));
        }

        let request = ScanRequest::new::<T>(self.config(), expression)?;
        let segments = (0..total_segments)
            .map(|segment| {
                ScanSource::new(
                    self.client().clone(),
                    request.for_segment(segment, total_segments),
                )
            })
            .collect();

        PaginatedList::new(
            Box::new(ParallelScanSource { segments }),
            self.config().pagination_loading_strategy,
        )
        .await
    }

    /// Number of items matching the scan, over every page
    pub async fn count_scan<T: DynamoTable>(&self, expression: &ScanExpression) -> Result<usize, Error> {
        let request = ScanRequest::new::<T>(self.config(), expression)?;

        tracing::debug!(table = %request.table_name, index = ?request.index_name, "count scan");

        request
            .builder(self.client())
            .select(Select::Count)
            .set_projection_expression(None)
            .set_limit(None)
            .into_paginator()
            .send()
            .into_stream_03x()
            .map_err(Into::<Error>::into)
            .try_fold(0usize, |total, page| async move {
                Ok(total + page.count as usize)
            })
            .await
    }
}
