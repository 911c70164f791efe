use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::config::SaveBehavior;
use crate::error::Error;
use crate::table::DynamoTable;
use crate::table::condition::{Condition, ExpressionBuilder, and_expressions};
use crate::table::expression::RawExpression;
use crate::table::types::Item;

/// Key, version and generated-key attributes of a mapped type
#[derive(Clone, Copy, Debug)]
pub(crate) struct ItemLayout {
    pub(crate) table: &'static str,
    pub(crate) hash_key: &'static str,
    pub(crate) range_key: Option<&'static str>,
    pub(crate) version_attribute: Option<&'static str>,
    pub(crate) auto_generated_key: Option<&'static str>,
}

impl ItemLayout {
    pub(crate) fn of<T: DynamoTable>() -> Self {
        Self {
            table: T::TABLE,
            hash_key: T::PARTITION_KEY,
            range_key: T::SORT_KEY,
            version_attribute: T::VERSION_ATTRIBUTE,
            auto_generated_key: T::AUTO_GENERATED_KEY,
        }
    }

    fn is_key(&self, attribute: &str) -> bool {
        attribute == self.hash_key || self.range_key == Some(attribute)
    }

    /// Primary key attributes of `item`
    pub(crate) fn key_of(&self, item: &Item) -> Result<Item, Error> {
        let mut key = Item::new();

        for attribute in std::iter::once(self.hash_key).chain(self.range_key) {
            match item.get(attribute) {
                Some(value) if !matches!(value, AttributeValue::Null(_)) => {
                    let _ = key.insert(attribute.to_string(), value.clone());
                }
                _ => {
                    return Err(Error::MissingKey {
                        table: self.table.to_string(),
                        attribute: attribute.to_string(),
                    });
                }
            }
        }

        Ok(key)
    }

    /// Give the auto-generated key a fresh UUID when it has no value yet
    pub(crate) fn fill_generated_key(&self, item: &mut Item) {
        let Some(attribute) = self.auto_generated_key else {
            return;
        };

        let missing = match item.get(attribute) {
            None | Some(AttributeValue::Null(_)) => true,
            Some(AttributeValue::S(value)) => value.is_empty(),
            Some(_) => false,
        };

        if missing {
            let _ = item.insert(
                attribute.to_string(),
                AttributeValue::S(Uuid::new_v4().to_string()),
            );
        }
    }

    /// Condition on the stored version matching the one in `item`
    fn expected_version(&self, item: &Item) -> Result<Option<(&'static str, Condition, u64)>, Error> {
        let Some(attribute) = self.version_attribute else {
            return Ok(None);
        };

        match item.get(attribute) {
            None | Some(AttributeValue::Null(_)) => Ok(Some((attribute, Condition::Null, 0))),
            Some(AttributeValue::N(current)) => {
                let version = current.parse::<u64>().map_err(|e| Error::InvalidVersion {
                    attribute: attribute.to_string(),
                    reason: format!("{current} is not a non-negative integer: {e}"),
                })?;
                Ok(Some((
                    attribute,
                    Condition::Eq(AttributeValue::N(current.clone())),
                    version,
                )))
            }
            Some(other) => Err(Error::InvalidVersion {
                attribute: attribute.to_string(),
                reason: format!("expected a number, found {other:?}"),
            }),
        }
    }
}

/// Condition and placeholders shared by every write request
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct WriteCondition {
    pub(crate) condition_expression: Option<String>,
    pub(crate) names: Option<HashMap<String, String>>,
    pub(crate) values: Option<HashMap<String, AttributeValue>>,
}

/// Request a save turns into
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SaveRequest {
    Put {
        item: Item,
        condition: WriteCondition,
    },
    Update {
        key: Item,
        update_expression: Option<String>,
        condition: WriteCondition,
    },
}

/// Outcome of planning a save: the request plus the item as it will be stored
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SavePlan {
    pub(crate) request: SaveRequest,
    pub(crate) item: Item,
}

/// Plan the write for `item` under `behavior`
pub(crate) fn plan_save(
    layout: &ItemLayout,
    mut item: Item,
    behavior: SaveBehavior,
    user: Option<&RawExpression>,
) -> Result<SavePlan, Error> {
    layout.fill_generated_key(&mut item);

    let key = layout.key_of(&item)?;
    let expected = layout.expected_version(&item)?;

    let mut builder = ExpressionBuilder::new();
    let mut version_condition = None;

    if let Some((attribute, condition, current)) = expected {
        let next = current.checked_add(1).ok_or_else(|| Error::InvalidVersion {
            attribute: attribute.to_string(),
            reason: "version overflow".to_string(),
        })?;

        if behavior.checks_version() {
            version_condition = Some(condition.render(attribute, &mut builder)?);
        }

        let _ = item.insert(attribute.to_string(), AttributeValue::N(next.to_string()));
    }

    let condition_expression = and_expressions(
        version_condition,
        user.and_then(|raw| raw.expression.clone()),
    );

    let request = match behavior {
        SaveBehavior::Put | SaveBehavior::Clobber => {
            let condition = finish(builder, condition_expression, user)?;
            SaveRequest::Put {
                item: item.clone(),
                condition,
            }
        }
        SaveBehavior::Update | SaveBehavior::UpdateSkipNullAttributes | SaveBehavior::AppendSet => {
            let update_expression = update_expression(layout, &item, behavior, &mut builder);
            let condition = finish(builder, condition_expression, user)?;
            SaveRequest::Update {
                key,
                update_expression,
                condition,
            }
        }
    };

    Ok(SavePlan { request, item })
}

/// Plan the condition of a delete of `item`
pub(crate) fn plan_delete(
    layout: &ItemLayout,
    item: &Item,
    behavior: SaveBehavior,
    user: Option<&RawExpression>,
) -> Result<(Item, WriteCondition), Error> {
    let key = layout.key_of(item)?;

    let mut builder = ExpressionBuilder::new();
    let mut version_condition = None;

    if behavior.checks_version() {
        if let Some((attribute, condition, _)) = layout.expected_version(item)? {
            version_condition = Some(condition.render(attribute, &mut builder)?);
        }
    }

    let condition_expression = and_expressions(
        version_condition,
        user.and_then(|raw| raw.expression.clone()),
    );

    Ok((key, finish(builder, condition_expression, user)?))
}

/// SET / REMOVE / ADD clauses for the non-key attributes of `item`
fn update_expression(
    layout: &ItemLayout,
    item: &Item,
    behavior: SaveBehavior,
    builder: &mut ExpressionBuilder,
) -> Option<String> {
    let mut set = Vec::new();
    let mut remove = Vec::new();
    let mut add = Vec::new();

    // sorted so the same item always renders the same expression
    let attributes: BTreeMap<&String, &AttributeValue> = item.iter().collect();

    for (attribute, value) in attributes {
        if layout.is_key(attribute) {
            continue;
        }

        match value {
            AttributeValue::Null(_) => {
                if behavior == SaveBehavior::Update {
                    remove.push(builder.name(attribute));
                }
            }
            AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)
                if behavior == SaveBehavior::AppendSet =>
            {
                let name = builder.name(attribute);
                let value = builder.value(value.clone());
                add.push(format!("{name} {value}"));
            }
            _ => {
                let name = builder.name(attribute);
                let value = builder.value(value.clone());
                set.push(format!("{name} = {value}"));
            }
        }
    }

    let mut clauses = Vec::new();
    if !set.is_empty() {
        clauses.push(format!("SET {}", set.join(", ")));
    }
    if !remove.is_empty() {
        clauses.push(format!("REMOVE {}", remove.join(", ")));
    }
    if !add.is_empty() {
        clauses.push(format!("ADD {}", add.join(", ")));
    }

    (!clauses.is_empty()).then(|| clauses.join(" "))
}

fn finish(
    mut builder: ExpressionBuilder,
    condition_expression: Option<String>,
    user: Option<&RawExpression>,
) -> Result<WriteCondition, Error> {
    if let Some(raw) = user {
        builder.merge_user(&raw.names, &raw.values)?;
    }

    let (names, values) = builder.into_parts();

    Ok(WriteCondition {
        condition_expression,
        names,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: ItemLayout = ItemLayout {
        table: "documents",
        hash_key: "id",
        range_key: Some("revision"),
        version_attribute: Some("version"),
        auto_generated_key: Some("id"),
    };

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_string())
    }

    fn n(v: &str) -> AttributeValue {
        AttributeValue::N(v.to_string())
    }

    fn item(values: &[(&str, AttributeValue)]) -> Item {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_new_item_expects_absent_version() {
        let plan = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", n("1")), ("title", s("draft"))]),
            SaveBehavior::Update,
            None,
        )
        .unwrap();

        assert_eq!(plan.item.get("version"), Some(&n("1")));

        let SaveRequest::Update {
            key,
            update_expression,
            condition,
        } = plan.request
        else {
            panic!("expected an update");
        };

        assert_eq!(key.len(), 2);
        assert_eq!(
            condition.condition_expression.as_deref(),
            Some("attribute_not_exists(#attr0)")
        );
        assert_eq!(
            update_expression.as_deref(),
            Some("SET #attr1 = :val0, #attr0 = :val1")
        );

        let names = condition.names.unwrap();
        assert_eq!(names["#attr0"], "version");
        assert_eq!(names["#attr1"], "title");
        assert_eq!(condition.values.unwrap()[":val1"], n("1"));
    }

    #[test]
    fn test_existing_version_is_checked_and_incremented() {
        let plan = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", n("1")), ("version", n("7"))]),
            SaveBehavior::Put,
            None,
        )
        .unwrap();

        assert_eq!(plan.item.get("version"), Some(&n("8")));

        let SaveRequest::Put { item, condition } = plan.request else {
            panic!("expected a put");
        };

        assert_eq!(item.get("version"), Some(&n("8")));
        assert_eq!(condition.condition_expression.as_deref(), Some("#attr0 = :val0"));
        assert_eq!(condition.values.unwrap()[":val0"], n("7"));
    }

    #[test]
    fn test_clobber_skips_version_condition() {
        let plan = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", n("1")), ("version", n("2"))]),
            SaveBehavior::Clobber,
            None,
        )
        .unwrap();

        assert_eq!(plan.item.get("version"), Some(&n("3")));
        let SaveRequest::Put { condition, .. } = plan.request else {
            panic!("expected a put");
        };
        assert_eq!(condition, WriteCondition::default());
    }

    #[test]
    fn test_invalid_version() {
        let err = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", n("1")), ("version", s("seven"))]),
            SaveBehavior::Update,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { attribute, .. } if attribute == "version"));

        let err = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", n("1")), ("version", n("1.5"))]),
            SaveBehavior::Update,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }));
    }

    #[test]
    fn test_generated_key() {
        let plan = plan_save(
            &LAYOUT,
            item(&[("id", s("")), ("revision", n("1"))]),
            SaveBehavior::Clobber,
            None,
        )
        .unwrap();

        let Some(AttributeValue::S(id)) = plan.item.get("id") else {
            panic!("expected a generated id");
        };
        assert!(Uuid::parse_str(id).is_ok());

        let plan = plan_save(
            &LAYOUT,
            item(&[("id", s("keep")), ("revision", n("1"))]),
            SaveBehavior::Clobber,
            None,
        )
        .unwrap();
        assert_eq!(plan.item.get("id"), Some(&s("keep")));
    }

    #[test]
    fn test_missing_range_key() {
        let err = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", AttributeValue::Null(true))]),
            SaveBehavior::Update,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingKey { attribute, .. } if attribute == "revision"));
    }

    #[test]
    fn test_update_behaviours() {
        let layout = ItemLayout {
            version_attribute: None,
            auto_generated_key: None,
            ..LAYOUT
        };
        let source = item(&[
            ("id", s("d1")),
            ("revision", n("1")),
            ("archived", AttributeValue::Null(true)),
            ("tags", AttributeValue::Ss(vec!["a".into()])),
            ("title", s("t")),
        ]);

        let update = |behavior| match plan_save(&layout, source.clone(), behavior, None)
            .unwrap()
            .request
        {
            SaveRequest::Update {
                update_expression, ..
            } => update_expression,
            SaveRequest::Put { .. } => panic!("expected an update"),
        };

        assert_eq!(
            update(SaveBehavior::Update).as_deref(),
            Some("SET #attr1 = :val0, #attr2 = :val1 REMOVE #attr0")
        );
        assert_eq!(
            update(SaveBehavior::UpdateSkipNullAttributes).as_deref(),
            Some("SET #attr0 = :val0, #attr1 = :val1")
        );
        assert_eq!(
            update(SaveBehavior::AppendSet).as_deref(),
            Some("SET #attr1 = :val1 ADD #attr0 :val0")
        );
    }

    #[test]
    fn test_key_only_item_has_no_update_expression() {
        let layout = ItemLayout {
            version_attribute: None,
            ..LAYOUT
        };
        let plan = plan_save(
            &layout,
            item(&[("id", s("d1")), ("revision", n("1"))]),
            SaveBehavior::Update,
            None,
        )
        .unwrap();

        assert!(matches!(
            plan.request,
            SaveRequest::Update {
                update_expression: None,
                ..
            }
        ));
    }

    #[test]
    fn test_user_condition_is_anded() {
        let user = RawExpression {
            expression: Some("#s <> :closed".to_string()),
            names: HashMap::from([("#s".to_string(), "status".to_string())]),
            values: HashMap::from([(":closed".to_string(), s("closed"))]),
        };

        let plan = plan_save(
            &LAYOUT,
            item(&[("id", s("d1")), ("revision", n("1")), ("version", n("1"))]),
            SaveBehavior::Put,
            Some(&user),
        )
        .unwrap();

        let SaveRequest::Put { condition, .. } = plan.request else {
            panic!("expected a put");
        };
        assert_eq!(
            condition.condition_expression.as_deref(),
            Some("(#attr0 = :val0) AND (#s <> :closed)")
        );
        assert_eq!(condition.names.unwrap().len(), 2);
        assert_eq!(condition.values.unwrap().len(), 2);
    }

    #[test]
    fn test_delete_conditions() {
        let stored = item(&[("id", s("d1")), ("revision", n("1")), ("version", n("4"))]);

        let (key, condition) = plan_delete(&LAYOUT, &stored, SaveBehavior::Update, None).unwrap();
        assert_eq!(key.len(), 2);
        assert_eq!(condition.condition_expression.as_deref(), Some("#attr0 = :val0"));
        assert_eq!(condition.values.unwrap()[":val0"], n("4"));

        let (_, condition) = plan_delete(&LAYOUT, &stored, SaveBehavior::Clobber, None).unwrap();
        assert_eq!(condition, WriteCondition::default());
    }
}
