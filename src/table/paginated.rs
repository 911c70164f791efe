use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream};
use std::fmt;

use crate::config::PaginationLoadingStrategy;
use crate::error::Error;
use crate::table::types::ResultPage;

/// Produces the pages behind a `PaginatedList`
///
/// Returns `None` once there is nothing left to fetch.
pub(crate) trait PageSource<T>: Send {
    fn next_page(&mut self) -> BoxFuture<'_, Result<Option<ResultPage<T>>, Error>>;
}

/// Query or scan results fetched page by page
///
/// The first page is fetched when the list is created. How later pages are
/// kept depends on the [`PaginationLoadingStrategy`]:
///
/// - `LazyLoading` fetches pages when they are needed and keeps every item.
/// - `EagerLoading` fetches every page up front.
/// - `IterationOnly` keeps only the current page and can be streamed once.
///
/// ```no_run
/// use dynamo_mapper::{DynamoTable, Error, QueryExpression};
/// use futures_util::TryStreamExt;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Clone, Serialize, Deserialize)]
/// # struct Order { user_id: String, order_id: String }
/// # impl DynamoTable for Order {
/// #     type PK = String;
/// #     type SK = String;
/// #     const TABLE: &'static str = "orders";
/// #     const PARTITION_KEY: &'static str = "user_id";
/// #     const SORT_KEY: Option<&'static str> = Some("order_id");
/// #     fn partition_key(&self) -> String { self.user_id.clone() }
/// # }
///
/// # async fn example() -> Result<(), Error> {
/// let mut orders = Order::query(QueryExpression::for_partition_key(&"user123".to_string())?).await?;
///
/// let first = orders.get(0).await?.cloned();
/// let total = orders.len().await?;
///
/// let all: Vec<Order> = orders.stream().try_collect().await?;
/// # Ok(())
/// # }
/// ```
pub struct PaginatedList<T> {
    source: Box<dyn PageSource<T>>,
    strategy: PaginationLoadingStrategy,
    items: Vec<T>,
    offset: usize,
    pages_fetched: usize,
    exhausted: bool,
    iterated: bool,
}

impl<T> fmt::Debug for PaginatedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedList")
            .field("strategy", &self.strategy)
            .field("loaded", &self.items.len())
            .field("offset", &self.offset)
            .field("pages_fetched", &self.pages_fetched)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl<T> PaginatedList<T> {
    pub(crate) async fn new(
        source: Box<dyn PageSource<T>>,
        strategy: PaginationLoadingStrategy,
    ) -> Result<Self, Error> {
        let mut list = Self {
            source,
            strategy,
            items: Vec::new(),
            offset: 0,
            pages_fetched: 0,
            exhausted: false,
            iterated: false,
        };

        let _ = list.fetch_next_page().await?;

        if strategy == PaginationLoadingStrategy::EagerLoading {
            while list.fetch_next_page().await? {}
        }

        Ok(list)
    }

    /// Strategy this list was built with
    pub fn strategy(&self) -> PaginationLoadingStrategy {
        self.strategy
    }

    /// Items currently held in memory
    pub fn loaded_items(&self) -> &[T] {
        &self.items
    }

    /// Whether every page has been fetched
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Number of pages fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch every remaining page
    pub async fn load_all_results(&mut self) -> Result<(), Error> {
        self.ensure_random_access("load_all_results")?;
        while self.fetch_next_page().await? {}
        Ok(())
    }

    /// Total number of results; fetches every remaining page
    pub async fn len(&mut self) -> Result<usize, Error> {
        self.load_all_results().await?;
        Ok(self.items.len())
    }

    /// Whether there are no results at all
    pub async fn is_empty(&mut self) -> Result<bool, Error> {
        self.ensure_random_access("is_empty")?;
        while self.items.is_empty() && self.fetch_next_page().await? {}
        Ok(self.items.is_empty())
    }

    /// Result at `index`, fetching pages up to it
    pub async fn get(&mut self, index: usize) -> Result<Option<&T>, Error> {
        self.ensure_random_access("get")?;
        while self.items.len() <= index && self.fetch_next_page().await? {}
        Ok(self.items.get(index))
    }

    /// Drain every result into a vector
    pub async fn into_vec(mut self) -> Result<Vec<T>, Error> {
        if self.strategy == PaginationLoadingStrategy::IterationOnly && self.iterated {
            return Err(Error::IterationOnly("iterating more than once"));
        }

        let mut results = std::mem::take(&mut self.items);
        while self.fetch_next_page().await? {
            results.append(&mut self.items);
        }
        Ok(results)
    }

    /// Stream every result in order, fetching pages as they are reached
    ///
    /// Lazy and eager lists can be streamed any number of times. An
    /// iteration-only list yields a single [`Error::IterationOnly`] the
    /// second time.
    pub fn stream(&mut self) -> impl Stream<Item = Result<T, Error>> + '_
    where
        T: Clone,
    {
        let rejected = self.strategy == PaginationLoadingStrategy::IterationOnly && self.iterated;
        self.iterated = true;

        stream::try_unfold((self, 0usize), move |(list, position)| async move {
            if rejected {
                return Err(Error::IterationOnly("iterating more than once"));
            }

            loop {
                let loaded = position
                    .checked_sub(list.offset)
                    .and_then(|index| list.items.get(index));

                if let Some(item) = loaded {
                    let item = item.clone();
                    return Ok(Some((item, (list, position + 1))));
                }

                if !list.fetch_next_page().await? {
                    return Ok(None);
                }
            }
        })
    }

    fn ensure_random_access(&self, operation: &'static str) -> Result<(), Error> {
        if self.strategy == PaginationLoadingStrategy::IterationOnly {
            return Err(Error::IterationOnly(operation));
        }
        Ok(())
    }

    /// Returns `false` once the source has nothing left
    async fn fetch_next_page(&mut self) -> Result<bool, Error> {
        if self.exhausted {
            return Ok(false);
        }

        let Some(page) = self.source.next_page().await? else {
            self.exhausted = true;
            return Ok(false);
        };

        self.pages_fetched += 1;

        if self.strategy == PaginationLoadingStrategy::IterationOnly {
            self.offset += self.items.len();
            self.items = page.items;
        } else {
            self.items.extend(page.items);
        }

        Ok(true)
    }
}
