/// Retry delays for batch operations
pub(crate) mod retry_config {
    use rand::Rng;
    use std::time::Duration;

    use crate::table::types::RetryConfig;

    /// Upper bound of the delay before retry `attempt` (0-based)
    ///
    /// Doubles from `initial` and never exceeds `max`.
    pub(crate) fn backoff_ceiling(attempt: usize, initial: Duration, max: Duration) -> Duration {
        let factor = 2u64.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
        let delay_ms = u64::try_from(initial.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(factor);
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Delay before retry `attempt`, drawn from the upper half of the backoff ceiling
    pub(crate) fn retry_delay(attempt: usize, retries: &RetryConfig) -> Duration {
        let ceiling = backoff_ceiling(attempt, retries.initial_delay, retries.max_delay);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);

        if ceiling_ms < 2 {
            return ceiling;
        }

        Duration::from_millis(rand::rng().random_range(ceiling_ms / 2..=ceiling_ms))
    }
}

/// Primary key maps built from typed key values
pub(crate) mod keys {
    use aws_sdk_dynamodb::types::AttributeValue;
    use serde_dynamo::from_attribute_value;

    use crate::error::Error;
    use crate::table::DynamoTable;
    use crate::table::condition::attribute_value;
    use crate::table::types::{CompositeKey, Item};

    /// Key map for `T` from a partition key and an optional sort key
    ///
    /// The sort key is required when `T` declares one, and ignored otherwise.
    pub(crate) fn key_for<T: DynamoTable>(
        table_name: &str,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
    ) -> Result<Item, Error> {
        let mut key = Item::new();
        let _ = key.insert(T::PARTITION_KEY.to_string(), attribute_value(partition_key)?);

        if let Some(sort_key_name) = T::SORT_KEY {
            let Some(sort_key) = sort_key else {
                return Err(Error::MissingKey {
                    table: table_name.to_string(),
                    attribute: sort_key_name.to_string(),
                });
            };
            let _ = key.insert(sort_key_name.to_string(), attribute_value(sort_key)?);
        }

        Ok(key)
    }

    /// Typed key back from a key map
    pub(crate) fn composite_key_of<T: DynamoTable>(
        key: &Item,
    ) -> Result<Option<CompositeKey<T::PK, T::SK>>, Error> {
        let Some(partition_key) = key.get(T::PARTITION_KEY) else {
            return Ok(None);
        };

        let partition_key: T::PK = from_attribute_value(partition_key.clone())?;
        let sort_key: Option<T::SK> = T::SORT_KEY
            .and_then(|name| key.get(name))
            .filter(|value| !matches!(value, AttributeValue::Null(_)))
            .map(|value| from_attribute_value(value.clone()))
            .transpose()?;

        Ok(Some((partition_key, sort_key)))
    }

    /// Key maps compared by value; `AttributeValue` is not hashable
    #[derive(Debug, Default)]
    pub(crate) struct KeyList {
        keys: Vec<Item>,
    }

    impl KeyList {
        pub(crate) fn push(&mut self, key: Item) {
            self.keys.push(key);
        }

        /// Remove one occurrence of `key`, returning whether it was present
        pub(crate) fn take(&mut self, key: &Item) -> bool {
            match self.keys.iter().position(|candidate| candidate == key) {
                Some(position) => {
                    let _ = self.keys.swap_remove(position);
                    true
                }
                None => false,
            }
        }

        pub(crate) fn len(&self) -> usize {
            self.keys.len()
        }
    }
}

/// Batch processing constants
pub(crate) mod batch_processor {
    use std::cmp;

    /// Standard batch sizes for DynamoDB operations
    pub(crate) const BATCH_WRITE_SIZE: usize = 25;
    pub(crate) const BATCH_READ_SIZE: usize = 100;
    pub(crate) const DEFAULT_CONCURRENCY: usize = 10;

    /// Requests in flight for `batches` chunks
    pub(crate) fn concurrency(batches: usize) -> usize {
        cmp::max(1, batches.min(DEFAULT_CONCURRENCY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DynamoTable;
    use crate::table::types::{Item, RetryConfig};
    use aws_sdk_dynamodb::types::AttributeValue;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        at: u64,
    }

    impl DynamoTable for Reading {
        type PK = String;
        type SK = u64;
        const TABLE: &'static str = "readings";
        const PARTITION_KEY: &'static str = "sensor";
        const SORT_KEY: Option<&'static str> = Some("at");

        fn partition_key(&self) -> String {
            self.sensor.clone()
        }

        fn sort_key(&self) -> Option<u64> {
            Some(self.at)
        }
    }

    #[test]
    fn test_backoff_ceiling_doubles_and_caps() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(1000);

        assert_eq!(retry_config::backoff_ceiling(0, initial, max), Duration::from_millis(100));
        assert_eq!(retry_config::backoff_ceiling(1, initial, max), Duration::from_millis(200));
        assert_eq!(retry_config::backoff_ceiling(3, initial, max), Duration::from_millis(800));
        assert_eq!(retry_config::backoff_ceiling(4, initial, max), max);
        assert_eq!(retry_config::backoff_ceiling(80, initial, max), max);
    }

    #[test]
    fn test_retry_delay_jitter_bounds() {
        let retries = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(3000),
        };

        for attempt in 0..8 {
            let ceiling =
                retry_config::backoff_ceiling(attempt, retries.initial_delay, retries.max_delay);
            for _ in 0..20 {
                let delay = retry_config::retry_delay(attempt, &retries);
                assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
                assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
            }
        }
    }

    #[test]
    fn test_zero_delay() {
        let retries = RetryConfig {
            max_retries: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        assert_eq!(retry_config::retry_delay(3, &retries), Duration::ZERO);
    }

    #[test]
    fn test_key_for() {
        let key = keys::key_for::<Reading>("readings", &"s1".to_string(), Some(&42)).unwrap();
        assert_eq!(key.get("sensor"), Some(&AttributeValue::S("s1".into())));
        assert_eq!(key.get("at"), Some(&AttributeValue::N("42".into())));

        let err = keys::key_for::<Reading>("readings", &"s1".to_string(), None).unwrap_err();
        assert!(matches!(err, crate::Error::MissingKey { attribute, .. } if attribute == "at"));

        let back = keys::composite_key_of::<Reading>(&key).unwrap();
        assert_eq!(back, Some(("s1".to_string(), Some(42))));
    }

    #[test]
    fn test_key_list_take() {
        let key = |id: &str| -> Item {
            Item::from([("sensor".to_string(), AttributeValue::S(id.to_string()))])
        };

        let mut list = keys::KeyList::default();
        list.push(key("a"));
        list.push(key("a"));
        list.push(key("b"));

        assert!(list.take(&key("a")));
        assert!(list.take(&key("a")));
        assert!(!list.take(&key("a")));
        assert!(list.take(&key("b")));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_concurrency_bounds() {
        assert_eq!(batch_processor::concurrency(0), 1);
        assert_eq!(batch_processor::concurrency(3), 3);
        assert_eq!(batch_processor::concurrency(40), batch_processor::DEFAULT_CONCURRENCY);
    }
}
