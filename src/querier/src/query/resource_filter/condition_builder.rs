use common::model::{FieldContext, TelemetryFieldKey, Value};

use super::field_mapper::ResourceFieldMapper;
use crate::query::error::QueryError;
use crate::query::operator::FilterOperator;
use crate::query::statement::SqlBuilder;
use crate::query::where_clause::TRUE_CONDITION;
use crate::query::{ConditionBuilder, FieldMapper};

/// Renders conditions on resource keys against the `labels` JSON column.
///
/// Positive operators pair the semantic comparison with `LIKE` probes on the
/// raw column so the text index can discard rows early. Negative operators
/// only add a probe on the key/value pair, never on key presence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceConditionBuilder {
    mapper: ResourceFieldMapper,
}

impl ResourceConditionBuilder {
    pub fn new(mapper: ResourceFieldMapper) -> Self {
        Self { mapper }
    }
}

fn key_probe(key: &TelemetryFieldKey) -> String {
    format!("%{}%", key.name)
}

fn key_value_probe(key: &TelemetryFieldKey, value: &Value) -> String {
    format!("%{}\":\"{}%", key.name, value)
}

fn key_pattern_probe(key: &TelemetryFieldKey, value: &Value) -> String {
    format!("%{}%{}%", key.name, value)
}

fn list_items(value: &Value) -> Result<&[Value], QueryError> {
    match value {
        Value::List(items) if !items.is_empty() => Ok(items),
        _ => Err(QueryError::InValues),
    }
}

fn range_bounds(value: &Value) -> Result<(&Value, &Value), QueryError> {
    match value {
        Value::List(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        _ => Err(QueryError::BetweenValues),
    }
}

impl ConditionBuilder for ResourceConditionBuilder {
    fn condition_for(
        &self,
        key: &TelemetryFieldKey,
        operator: FilterOperator,
        value: &Value,
        sb: &mut SqlBuilder,
    ) -> Result<String, QueryError> {
        if key.field_context != FieldContext::Resource {
            return Ok(TRUE_CONDITION.to_string());
        }

        let column = self.mapper.column_for(key)?;
        let field = self.mapper.field_for(key)?;
        let labels = column.name;
        let key_name = key.name.replace('\\', "\\\\").replace('\'', "\\'");

        let condition = match operator {
            FilterOperator::Equal => format!(
                "({field} = {} AND {labels} LIKE {} AND {labels} LIKE {})",
                sb.var(value.clone()),
                sb.var(key_probe(key)),
                sb.var(key_value_probe(key, value)),
            ),
            FilterOperator::NotEqual => format!(
                "({field} <> {} AND {labels} NOT LIKE {})",
                sb.var(value.clone()),
                sb.var(key_value_probe(key, value)),
            ),
            FilterOperator::Like | FilterOperator::ILike => format!(
                "(LOWER({field}) LIKE LOWER({}) AND {labels} LIKE {} AND LOWER({labels}) LIKE LOWER({}))",
                sb.var(value.clone()),
                sb.var(key_probe(key)),
                sb.var(key_pattern_probe(key, value)),
            ),
            FilterOperator::NotLike | FilterOperator::NotILike => format!(
                "(LOWER({field}) NOT LIKE LOWER({}) AND LOWER({labels}) NOT LIKE LOWER({}))",
                sb.var(value.clone()),
                sb.var(key_pattern_probe(key, value)),
            ),
            FilterOperator::Contains => format!(
                "(LOWER({field}) LIKE LOWER({}) AND {labels} LIKE {} AND LOWER({labels}) LIKE LOWER({}))",
                sb.var(format!("%{value}%")),
                sb.var(key_probe(key)),
                sb.var(key_pattern_probe(key, value)),
            ),
            FilterOperator::NotContains => format!(
                "(LOWER({field}) NOT LIKE LOWER({}) AND LOWER({labels}) NOT LIKE LOWER({}))",
                sb.var(format!("%{value}%")),
                sb.var(key_pattern_probe(key, value)),
            ),
            FilterOperator::Exists => format!(
                "(simpleJSONHas({labels}, '{key_name}') = {} AND {labels} LIKE {})",
                sb.var(true),
                sb.var(key_probe(key)),
            ),
            FilterOperator::NotExists => format!(
                "(simpleJSONHas({labels}, '{key_name}') <> {})",
                sb.var(true),
            ),
            FilterOperator::In => {
                let items = list_items(value)?;
                let matches: Vec<String> = items
                    .iter()
                    .map(|item| format!("{field} = {}", sb.var(item.clone())))
                    .collect();
                let key_match = format!("{labels} LIKE {}", sb.var(key_probe(key)));
                let probes: Vec<String> = items
                    .iter()
                    .map(|item| format!("{labels} LIKE {}", sb.var(key_value_probe(key, item))))
                    .collect();
                format!(
                    "({} AND {key_match} AND {})",
                    SqlBuilder::or(&matches),
                    SqlBuilder::or(&probes)
                )
            }
            FilterOperator::NotIn => {
                let items = list_items(value)?;
                let mismatches: Vec<String> = items
                    .iter()
                    .map(|item| format!("{field} <> {}", sb.var(item.clone())))
                    .collect();
                let probes: Vec<String> = items
                    .iter()
                    .map(|item| {
                        format!("{labels} NOT LIKE {}", sb.var(key_value_probe(key, item)))
                    })
                    .collect();
                format!(
                    "({} AND {})",
                    SqlBuilder::and(&mismatches),
                    SqlBuilder::and(&probes)
                )
            }
            FilterOperator::Regexp => format!(
                "(match({field}, {}) AND {labels} LIKE {})",
                sb.var(value.clone()),
                sb.var(key_probe(key)),
            ),
            FilterOperator::NotRegexp => {
                format!("(NOT match({field}, {}))", sb.var(value.clone()))
            }
            FilterOperator::GreaterThan
            | FilterOperator::GreaterThanOrEq
            | FilterOperator::LessThan
            | FilterOperator::LessThanOrEq => format!(
                "({field} {} {} AND {labels} LIKE {})",
                operator.as_str(),
                sb.var(value.clone()),
                sb.var(key_probe(key)),
            ),
            FilterOperator::Between => {
                let (low, high) = range_bounds(value)?;
                format!(
                    "({field} BETWEEN {} AND {} AND {labels} LIKE {})",
                    sb.var(low.clone()),
                    sb.var(high.clone()),
                    sb.var(key_probe(key)),
                )
            }
            FilterOperator::NotBetween => {
                let (low, high) = range_bounds(value)?;
                format!(
                    "({field} NOT BETWEEN {} AND {})",
                    sb.var(low.clone()),
                    sb.var(high.clone()),
                )
            }
        };

        Ok(condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(
        key: &TelemetryFieldKey,
        operator: FilterOperator,
        value: Value,
    ) -> Result<(String, Vec<Value>), QueryError> {
        let builder = ResourceConditionBuilder::default();
        let mut sb = SqlBuilder::new();
        let cond = builder.condition_for(key, operator, &value, &mut sb)?;
        Ok((cond, sb.into_args()))
    }

    fn service() -> TelemetryFieldKey {
        TelemetryFieldKey::resource("service.name")
    }

    #[test]
    fn test_non_resource_keys_pass_through() {
        for key in [
            TelemetryFieldKey::attribute("http.method"),
            TelemetryFieldKey::new("unknown"),
            TelemetryFieldKey::new("body").with_context(FieldContext::Body),
        ] {
            for op in [
                FilterOperator::Equal,
                FilterOperator::NotIn,
                FilterOperator::Between,
                FilterOperator::NotExists,
            ] {
                let (cond, args) = render(&key, op, Value::from("x")).unwrap();
                assert_eq!(cond, TRUE_CONDITION);
                assert!(args.is_empty());
            }
        }
    }

    #[test]
    fn test_equal() {
        let (cond, args) = render(&service(), FilterOperator::Equal, "redis".into()).unwrap();
        assert_eq!(
            cond,
            "(extract(labels,'service.name') = ? AND labels LIKE ? AND labels LIKE ?)"
        );
        assert_eq!(
            args,
            vec![
                Value::from("redis"),
                Value::from("%service.name%"),
                Value::from("%service.name\":\"redis%"),
            ]
        );
    }

    #[test]
    fn test_not_equal_skips_key_probe() {
        let (cond, args) = render(&service(), FilterOperator::NotEqual, "redis".into()).unwrap();
        assert_eq!(
            cond,
            "(extract(labels,'service.name') <> ? AND labels NOT LIKE ?)"
        );
        assert_eq!(
            args,
            vec![Value::from("redis"), Value::from("%service.name\":\"redis%")]
        );
    }

    #[test]
    fn test_like_and_contains() {
        let (cond, args) = render(&service(), FilterOperator::Like, "redis%".into()).unwrap();
        assert_eq!(
            cond,
            "(LOWER(extract(labels,'service.name')) LIKE LOWER(?) AND labels LIKE ? AND LOWER(labels) LIKE LOWER(?))"
        );
        assert_eq!(args[2], Value::from("%service.name%redis%%"));

        let (_, args) = render(&service(), FilterOperator::Contains, "redis".into()).unwrap();
        assert_eq!(args[0], Value::from("%redis%"));
        assert_eq!(args[2], Value::from("%service.name%redis%"));

        let (cond, args) =
            render(&service(), FilterOperator::NotContains, "redis".into()).unwrap();
        assert_eq!(
            cond,
            "(LOWER(extract(labels,'service.name')) NOT LIKE LOWER(?) AND LOWER(labels) NOT LIKE LOWER(?))"
        );
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_exists() {
        let (cond, args) = render(&service(), FilterOperator::Exists, Value::Null).unwrap();
        assert_eq!(
            cond,
            "(simpleJSONHas(labels, 'service.name') = ? AND labels LIKE ?)"
        );
        assert_eq!(args, vec![Value::Bool(true), Value::from("%service.name%")]);

        let (cond, _) = render(&service(), FilterOperator::NotExists, Value::Null).unwrap();
        assert_eq!(cond, "(simpleJSONHas(labels, 'service.name') <> ?)");
    }

    #[test]
    fn test_in_and_not_in() {
        let values = Value::from(vec!["redis", "postgres"]);
        let (cond, args) = render(&service(), FilterOperator::In, values.clone()).unwrap();
        assert_eq!(
            cond,
            "((extract(labels,'service.name') = ? OR extract(labels,'service.name') = ?) AND labels LIKE ? AND (labels LIKE ? OR labels LIKE ?))"
        );
        assert_eq!(
            args,
            vec![
                Value::from("redis"),
                Value::from("postgres"),
                Value::from("%service.name%"),
                Value::from("%service.name\":\"redis%"),
                Value::from("%service.name\":\"postgres%"),
            ]
        );

        let (cond, args) = render(&service(), FilterOperator::NotIn, values).unwrap();
        assert_eq!(
            cond,
            "((extract(labels,'service.name') <> ? AND extract(labels,'service.name') <> ?) AND (labels NOT LIKE ? AND labels NOT LIKE ?))"
        );
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn test_every_operator_renders_for_resource_keys() {
        let pair = Value::from(vec![1i64, 2]);
        for op in [
            FilterOperator::Equal,
            FilterOperator::NotEqual,
            FilterOperator::GreaterThan,
            FilterOperator::GreaterThanOrEq,
            FilterOperator::LessThan,
            FilterOperator::LessThanOrEq,
            FilterOperator::Like,
            FilterOperator::NotLike,
            FilterOperator::ILike,
            FilterOperator::NotILike,
            FilterOperator::Between,
            FilterOperator::NotBetween,
            FilterOperator::In,
            FilterOperator::NotIn,
            FilterOperator::Exists,
            FilterOperator::NotExists,
            FilterOperator::Regexp,
            FilterOperator::NotRegexp,
            FilterOperator::Contains,
            FilterOperator::NotContains,
        ] {
            let (cond, _) = render(&service(), op, pair.clone()).unwrap();
            assert_ne!(cond, TRUE_CONDITION, "{op:?}");
        }
    }

    #[test]
    fn test_in_requires_list() {
        assert_eq!(
            render(&service(), FilterOperator::In, "redis".into()),
            Err(QueryError::InValues)
        );
        assert_eq!(
            render(&service(), FilterOperator::NotIn, Value::Int64(1)),
            Err(QueryError::InValues)
        );
        for operator in [FilterOperator::In, FilterOperator::NotIn] {
            assert_eq!(
                render(&service(), operator, Value::List(vec![])),
                Err(QueryError::InValues)
            );
        }
    }

    #[test]
    fn test_between_requires_two_values() {
        let key = TelemetryFieldKey::resource("k8s.pod.count");
        for value in [
            Value::Int64(1),
            Value::from(vec![1i64]),
            Value::from(vec![1i64, 2, 3]),
        ] {
            assert_eq!(
                render(&key, FilterOperator::Between, value.clone()),
                Err(QueryError::BetweenValues)
            );
            assert_eq!(
                render(&key, FilterOperator::NotBetween, value),
                Err(QueryError::BetweenValues)
            );
        }

        let (cond, args) =
            render(&key, FilterOperator::Between, Value::from(vec![1i64, 5])).unwrap();
        assert_eq!(
            cond,
            "(extract(labels,'k8s.pod.count') BETWEEN ? AND ? AND labels LIKE ?)"
        );
        assert_eq!(args.len(), 3);

        let (cond, _) =
            render(&key, FilterOperator::NotBetween, Value::from(vec![1i64, 5])).unwrap();
        assert_eq!(cond, "(extract(labels,'k8s.pod.count') NOT BETWEEN ? AND ?)");
    }

    #[test]
    fn test_regexp_and_ordering() {
        let (cond, _) = render(&service(), FilterOperator::Regexp, "^re.*".into()).unwrap();
        assert_eq!(
            cond,
            "(match(extract(labels,'service.name'), ?) AND labels LIKE ?)"
        );
        let (cond, _) = render(&service(), FilterOperator::NotRegexp, "^re.*".into()).unwrap();
        assert_eq!(cond, "(NOT match(extract(labels,'service.name'), ?))");

        let (cond, args) =
            render(&service(), FilterOperator::GreaterThanOrEq, Value::Int64(3)).unwrap();
        assert_eq!(
            cond,
            "(extract(labels,'service.name') >= ? AND labels LIKE ?)"
        );
        assert_eq!(args[0], Value::Int64(3));
    }
}
