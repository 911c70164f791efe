use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Error;
use crate::schema::{IndexKind, TableKeySchema};
use crate::table::condition::Condition;
use crate::table::types::Item;

/// Index to query and the key conditions to send, hash key first
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ResolvedKeyConditions {
    pub(crate) index_name: Option<String>,
    pub(crate) conditions: Vec<(String, Condition)>,
}

/// Work out which table or index a query targets from its hash key values and range key conditions
pub(crate) fn resolve_key_conditions(
    schema: &TableKeySchema,
    hash_key_values: &Item,
    range_key_conditions: &BTreeMap<String, Condition>,
    index_name: Option<&str>,
    consistent_read: bool,
) -> Result<ResolvedKeyConditions, Error> {
    if let Some(name) = index_name {
        if schema.indexes().get(name).is_none() {
            return Err(Error::InvalidQuery(format!(
                "index {name} is not declared on the table"
            )));
        }
    }

    let (hash_key, hash_value) = resolve_hash_key(schema, hash_key_values, index_name)?;
    let range_condition = resolve_range_condition(schema, range_key_conditions, index_name)?;

    let resolved_index = match &range_condition {
        Some((range_key, _)) => index_for_range_key(schema, hash_key, range_key, index_name)?,
        None => index_for_hash_key(schema, hash_key, index_name)?,
    };

    if let Some(name) = &resolved_index {
        let is_global = schema
            .indexes()
            .get(name)
            .map(|index| index.is_global())
            .unwrap_or(false);

        if is_global && consistent_read {
            return Err(Error::InvalidQuery(format!(
                "Consistent reads are not supported on global secondary index {name}"
            )));
        }
    }

    let mut conditions = vec![(hash_key.to_string(), Condition::Eq(hash_value.clone()))];
    conditions.extend(range_condition);

    Ok(ResolvedKeyConditions {
        index_name: resolved_index,
        conditions,
    })
}

fn resolve_hash_key<'a>(
    schema: &TableKeySchema,
    hash_key_values: &'a Item,
    index_name: Option<&str>,
) -> Result<(&'a str, &'a AttributeValue), Error> {
    let candidates: BTreeMap<&str, &AttributeValue> = hash_key_values
        .iter()
        .filter(|(_, value)| !matches!(value, AttributeValue::Null(_)))
        .filter(|(name, _)| schema.is_any_hash_key(name))
        .map(|(name, value)| (name.as_str(), value))
        .collect();

    if candidates.is_empty() {
        return Err(Error::InvalidQuery(
            "No hash key condition is found in the query".to_string(),
        ));
    }

    if let Some((name, value)) = candidates.iter().next().filter(|_| candidates.len() == 1) {
        return Ok((*name, *value));
    }

    let Some(index_name) = index_name else {
        let names: Vec<&str> = candidates.keys().copied().collect();
        return Err(Error::AmbiguousQuery(format!(
            "more than one hash key attribute is given ({}), specify the index name",
            names.join(", ")
        )));
    };

    let index_hash_key = match schema.indexes().get(index_name) {
        Some(index) if index.kind == IndexKind::Global => index.hash_key.map(|key| key.name),
        Some(_) => Some(schema.hash_key()),
        None => None,
    };

    index_hash_key
        .and_then(|name| candidates.get_key_value(name))
        .map(|(name, value)| (*name, *value))
        .ok_or_else(|| {
            Error::InvalidQuery(format!(
                "none of the given hash key attributes is the hash key of index {index_name}"
            ))
        })
}

fn resolve_range_condition(
    schema: &TableKeySchema,
    range_key_conditions: &BTreeMap<String, Condition>,
    index_name: Option<&str>,
) -> Result<Option<(String, Condition)>, Error> {
    let selected = match range_key_conditions.len() {
        0 => return Ok(None),
        1 => range_key_conditions.iter().next(),
        _ => {
            let Some(index_name) = index_name else {
                return Err(Error::InvalidQuery(
                    "A query can have only one range key condition".to_string(),
                ));
            };

            let index_range_key = schema
                .indexes()
                .get(index_name)
                .and_then(|index| index.range_key)
                .map(|key| key.name);

            let selected = index_range_key.and_then(|name| range_key_conditions.get_key_value(name));

            if selected.is_none() {
                return Err(Error::InvalidQuery(format!(
                    "none of the range key conditions is on the range key of index {index_name}"
                )));
            }
            selected
        }
    };

    let Some((range_key, condition)) = selected else {
        return Ok(None);
    };

    if !schema.is_any_range_key(range_key) {
        return Err(Error::InvalidQuery(format!(
            "{range_key} is not the range key of the table or of any of its indexes"
        )));
    }

    if !condition.is_key_condition() {
        return Err(Error::InvalidQuery(format!(
            "{} cannot be used in a range key condition on {range_key}",
            condition.operator()
        )));
    }

    Ok(Some((range_key.clone(), condition.clone())))
}

fn index_for_range_key(
    schema: &TableKeySchema,
    hash_key: &str,
    range_key: &str,
    index_name: Option<&str>,
) -> Result<Option<String>, Error> {
    let indexes = schema.indexes();
    let mut table_applies = false;
    let mut candidates: BTreeSet<&'static str> = indexes
        .gsis_on_hash_key(hash_key)
        .intersection(&indexes.gsis_on_range_key(range_key))
        .copied()
        .collect();

    if hash_key == schema.hash_key() {
        table_applies = schema.range_key() == Some(range_key);
        candidates.extend(indexes.lsis_on_range_key(range_key));
    }

    if let Some(name) = index_name {
        if candidates.contains(name) {
            return Ok(Some(name.to_string()));
        }
        return Err(Error::InvalidQuery(format!(
            "index {name} is not keyed on hash key {hash_key} and range key {range_key}"
        )));
    }

    if table_applies {
        return Ok(None);
    }

    match candidates.len() {
        0 => Err(Error::InvalidQuery(format!(
            "Cannot infer the index name from the query: no index has hash key {hash_key} and range key {range_key}"
        ))),
        1 => Ok(candidates.into_iter().next().map(str::to_string)),
        _ => Err(Error::AmbiguousQuery(format!(
            "indexes {} all have hash key {hash_key} and range key {range_key}, specify the index name",
            candidates.into_iter().collect::<Vec<_>>().join(", ")
        ))),
    }
}

fn index_for_hash_key(
    schema: &TableKeySchema,
    hash_key: &str,
    index_name: Option<&str>,
) -> Result<Option<String>, Error> {
    let indexes = schema.indexes();
    let gsis = indexes.gsis_on_hash_key(hash_key);

    if hash_key == schema.hash_key() {
        return match index_name {
            None => Ok(None),
            Some(name) => {
                let is_local = indexes
                    .get(name)
                    .map(|index| index.kind == IndexKind::Local)
                    .unwrap_or(false);

                if is_local || gsis.contains(name) {
                    Ok(Some(name.to_string()))
                } else {
                    Err(Error::InvalidQuery(format!(
                        "index {name} cannot be queried by the table hash key {hash_key}"
                    )))
                }
            }
        };
    }

    match index_name {
        Some(name) if gsis.contains(name) => Ok(Some(name.to_string())),
        Some(name) => Err(Error::InvalidQuery(format!(
            "index {name} is not hashed on {hash_key}"
        ))),
        None => match gsis.len() {
            1 => Ok(gsis.into_iter().next().map(str::to_string)),
            0 => Err(Error::InvalidQuery(format!(
                "{hash_key} is neither the table hash key nor the hash key of a global secondary index"
            ))),
            _ => Err(Error::AmbiguousQuery(format!(
                "indexes {} are all hashed on {hash_key}, specify the index name",
                gsis.into_iter().collect::<Vec<_>>().join(", ")
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexSchema, KeyAttribute};

    // orders: user_id / order_id
    const INDEXES: &[IndexSchema] = &[
        IndexSchema::global("by-email", KeyAttribute::string("email")),
        IndexSchema::global("by-status", KeyAttribute::string("status"))
            .with_range_key(KeyAttribute::string("created_at")),
        IndexSchema::global("by-status-total", KeyAttribute::string("status"))
            .with_range_key(KeyAttribute::number("total")),
        IndexSchema::global("by-user-created", KeyAttribute::string("user_id"))
            .with_range_key(KeyAttribute::string("created_at")),
        IndexSchema::local("by-created", KeyAttribute::string("created_at")),
        IndexSchema::local("by-total", KeyAttribute::number("total")),
        IndexSchema::global("by-region", KeyAttribute::string("region")),
        IndexSchema::global("by-region-copy", KeyAttribute::string("region")),
    ];

    fn schema() -> TableKeySchema {
        TableKeySchema::new("user_id", Some("order_id"), INDEXES)
    }

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_string())
    }

    fn hash(values: &[(&str, AttributeValue)]) -> Item {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn range(conditions: &[(&str, Condition)]) -> BTreeMap<String, Condition> {
        conditions
            .iter()
            .map(|(k, c)| (k.to_string(), c.clone()))
            .collect()
    }

    fn resolve(
        hash_values: &[(&str, AttributeValue)],
        range_conditions: &[(&str, Condition)],
        index_name: Option<&str>,
    ) -> Result<ResolvedKeyConditions, Error> {
        resolve_key_conditions(
            &schema(),
            &hash(hash_values),
            &range(range_conditions),
            index_name,
            false,
        )
    }

    #[test]
    fn test_table_hash_key_only() {
        let resolved = resolve(&[("user_id", s("u1"))], &[], None).unwrap();
        assert_eq!(resolved.index_name, None);
        assert_eq!(
            resolved.conditions,
            vec![("user_id".to_string(), Condition::Eq(s("u1")))]
        );
    }

    #[test]
    fn test_non_key_attributes_are_ignored() {
        let resolved = resolve(
            &[("user_id", s("u1")), ("name", s("Alice")), ("created_at", s("2024"))],
            &[],
            None,
        )
        .unwrap();
        assert_eq!(resolved.conditions.len(), 1);
    }

    #[test]
    fn test_no_hash_key() {
        let err = resolve(&[("name", s("Alice"))], &[], None).unwrap_err();
        assert!(err.is_invalid_query());

        let err = resolve(&[("user_id", AttributeValue::Null(true))], &[], None).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(msg) if msg.contains("No hash key")));
    }

    #[test]
    fn test_hash_key_candidates() {
        let schema = schema();

        // a null value does not count as a candidate
        let values = hash(&[("user_id", s("u1")), ("email", AttributeValue::Null(true))]);
        let (name, value) = resolve_hash_key(&schema, &values, None).unwrap();
        assert_eq!((name, value), ("user_id", &s("u1")));

        let values = hash(&[("user_id", s("u1")), ("email", s("a@b.c")), ("note", s("x"))]);
        let (name, value) = resolve_hash_key(&schema, &values, Some("by-email")).unwrap();
        assert_eq!((name, value), ("email", &s("a@b.c")));

        let err = resolve_hash_key(&schema, &values, None).unwrap_err();
        assert!(matches!(err, Error::AmbiguousQuery(message) if message.contains("email, user_id")));
    }

    #[test]
    fn test_ambiguous_hash_keys() {
        let err = resolve(&[("user_id", s("u1")), ("email", s("a@b.c"))], &[], None).unwrap_err();
        assert!(matches!(err, Error::AmbiguousQuery(_)));
    }

    #[test]
    fn test_index_name_picks_hash_key() {
        let resolved = resolve(
            &[("user_id", s("u1")), ("email", s("a@b.c"))],
            &[],
            Some("by-email"),
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-email"));
        assert_eq!(resolved.conditions[0].0, "email");

        // a local index keeps the table hash key
        let resolved = resolve(
            &[("user_id", s("u1")), ("email", s("a@b.c"))],
            &[],
            Some("by-created"),
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-created"));
        assert_eq!(resolved.conditions[0].0, "user_id");
    }

    #[test]
    fn test_index_name_without_matching_hash_key() {
        let err = resolve(
            &[("user_id", s("u1")), ("email", s("a@b.c"))],
            &[],
            Some("by-region"),
        )
        .unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn test_unknown_index_name() {
        let err = resolve(&[("user_id", s("u1"))], &[], Some("missing")).unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn test_table_preferred_for_table_range_key() {
        let resolved = resolve(
            &[("user_id", s("u1"))],
            &[("order_id", Condition::BeginsWith(s("2024")))],
            None,
        )
        .unwrap();
        assert_eq!(resolved.index_name, None);
        assert_eq!(resolved.conditions.len(), 2);
        assert_eq!(resolved.conditions[1].0, "order_id");
    }

    #[test]
    fn test_single_lsi_inferred() {
        let resolved = resolve(
            &[("user_id", s("u1"))],
            &[("total", Condition::Gt(AttributeValue::N("10".into())))],
            None,
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-total"));
    }

    #[test]
    fn test_lsi_and_gsi_on_same_keys_are_ambiguous() {
        // by-created (local) and by-user-created (global) both serve user_id + created_at
        let err = resolve(
            &[("user_id", s("u1"))],
            &[("created_at", Condition::Ge(s("2024")))],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::AmbiguousQuery(_)));

        let resolved = resolve(
            &[("user_id", s("u1"))],
            &[("created_at", Condition::Ge(s("2024")))],
            Some("by-user-created"),
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-user-created"));
    }

    #[test]
    fn test_single_gsi_inferred_from_range_key() {
        let resolved = resolve(
            &[("status", s("open"))],
            &[("total", Condition::Lt(AttributeValue::N("5".into())))],
            None,
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-status-total"));
    }

    #[test]
    fn test_gsi_hash_key_only() {
        let resolved = resolve(&[("email", s("a@b.c"))], &[], None).unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-email"));

        let err = resolve(&[("status", s("open"))], &[], None).unwrap_err();
        assert!(matches!(err, Error::AmbiguousQuery(_)));

        let resolved = resolve(&[("status", s("open"))], &[], Some("by-status")).unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-status"));

        let err = resolve(&[("region", s("eu"))], &[], None).unwrap_err();
        assert!(matches!(err, Error::AmbiguousQuery(_)));
    }

    #[test]
    fn test_no_index_for_key_pair() {
        let err = resolve(
            &[("email", s("a@b.c"))],
            &[("created_at", Condition::Eq(s("2024")))],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(msg) if msg.contains("Cannot infer the index name")));
    }

    #[test]
    fn test_index_not_applicable_to_range_key() {
        let err = resolve(
            &[("user_id", s("u1"))],
            &[("order_id", Condition::Eq(s("o1")))],
            Some("by-total"),
        )
        .unwrap_err();
        assert!(err.is_invalid_query());

        let err = resolve(&[("email", s("a@b.c"))], &[], Some("by-created")).unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn test_table_hash_key_with_index_name() {
        let resolved = resolve(&[("user_id", s("u1"))], &[], Some("by-total")).unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-total"));

        let resolved = resolve(&[("user_id", s("u1"))], &[], Some("by-user-created")).unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-user-created"));

        let err = resolve(&[("user_id", s("u1"))], &[], Some("by-email")).unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn test_range_key_rules() {
        let err = resolve(
            &[("user_id", s("u1"))],
            &[
                ("order_id", Condition::Eq(s("o1"))),
                ("total", Condition::Gt(AttributeValue::N("1".into()))),
            ],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(msg) if msg.contains("only one range key")));

        let resolved = resolve(
            &[("user_id", s("u1"))],
            &[
                ("order_id", Condition::Eq(s("o1"))),
                ("total", Condition::Gt(AttributeValue::N("1".into()))),
            ],
            Some("by-total"),
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-total"));
        assert_eq!(resolved.conditions[1].0, "total");

        let err = resolve(
            &[("user_id", s("u1"))],
            &[("name", Condition::Eq(s("x")))],
            None,
        )
        .unwrap_err();
        assert!(err.is_invalid_query());

        let err = resolve(
            &[("user_id", s("u1"))],
            &[("order_id", Condition::Contains(s("x")))],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(msg) if msg.contains("CONTAINS")));
    }

    #[test]
    fn test_consistent_read_on_gsi() {
        let err = resolve_key_conditions(
            &schema(),
            &hash(&[("email", s("a@b.c"))]),
            &BTreeMap::new(),
            None,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(msg) if msg.contains("Consistent reads")));

        // local indexes support consistent reads
        let resolved = resolve_key_conditions(
            &schema(),
            &hash(&[("user_id", s("u1"))]),
            &range(&[("total", Condition::Gt(AttributeValue::N("1".into())))]),
            None,
            true,
        )
        .unwrap();
        assert_eq!(resolved.index_name.as_deref(), Some("by-total"));
    }
}
