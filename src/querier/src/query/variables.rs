//! Dashboard variable substitution for filter expressions.
//!
//! A bare value such as `$service` (or `service`) naming a supplied variable
//! is replaced by the variable's value. List values expand `IN` operands;
//! other operators take the first element. A dynamic variable set to
//! `__all__` removes the comparison that uses it.

use std::collections::HashMap;

use common::model::VariableItem;

use super::error::QueryError;
use super::filter::{Comparison, FilterExpr, Literal, Operand, parse_filter};
use super::operator::FilterOperator;

fn lookup<'a>(
    name: &str,
    variables: &'a HashMap<String, VariableItem>,
) -> Option<(&'a VariableItem, String)> {
    if let Some(item) = variables.get(name) {
        return Some((item, name.to_string()));
    }
    let stripped = name.strip_prefix('$')?;
    variables
        .get(stripped)
        .map(|item| (item, stripped.to_string()))
}

fn literal_from_json(value: &serde_json::Value) -> Literal {
    match value {
        serde_json::Value::String(s) => Literal::Text(s.clone()),
        serde_json::Value::Bool(b) => Literal::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Literal::Number)
            .unwrap_or_else(|| Literal::Text(n.to_string())),
        other => Literal::Text(other.to_string()),
    }
}

fn empty_list(name: &str) -> QueryError {
    QueryError::Variable(format!(
        "malformed request payload: variable `{name}` used in expression has an empty list value"
    ))
}

enum Resolved {
    Unchanged,
    /// The comparison should be dropped.
    All,
    Scalar(Literal),
    List(Vec<Literal>),
}

fn resolve(
    literal: &Literal,
    variables: &HashMap<String, VariableItem>,
) -> Result<Resolved, QueryError> {
    let Some(name) = literal.variable_name() else {
        return Ok(Resolved::Unchanged);
    };
    let Some((item, name)) = lookup(name, variables) else {
        return Ok(Resolved::Unchanged);
    };
    if item.selects_all() {
        return Ok(Resolved::All);
    }
    match &item.value {
        serde_json::Value::Array(items) if items.is_empty() => Err(empty_list(&name)),
        serde_json::Value::Array(items) => {
            Ok(Resolved::List(items.iter().map(literal_from_json).collect()))
        }
        value => Ok(Resolved::Scalar(literal_from_json(value))),
    }
}

/// Resolve a literal in scalar position.
fn scalar(
    literal: &Literal,
    variables: &HashMap<String, VariableItem>,
) -> Result<Option<Literal>, QueryError> {
    Ok(match resolve(literal, variables)? {
        Resolved::Unchanged => Some(literal.clone()),
        Resolved::All => None,
        Resolved::Scalar(lit) => Some(lit),
        Resolved::List(mut items) => Some(items.remove(0)),
    })
}

fn substitute_comparison(
    comparison: &Comparison,
    variables: &HashMap<String, VariableItem>,
) -> Result<Option<Comparison>, QueryError> {
    let is_in = matches!(
        comparison.operator,
        FilterOperator::In | FilterOperator::NotIn
    );

    let operand = match &comparison.operand {
        Operand::None => Operand::None,
        Operand::Single(lit) if is_in => match resolve(lit, variables)? {
            Resolved::Unchanged => Operand::Single(lit.clone()),
            Resolved::All => return Ok(None),
            Resolved::Scalar(lit) => Operand::Single(lit),
            Resolved::List(items) => Operand::List(items),
        },
        Operand::List(items) if is_in && items.len() == 1 => match resolve(&items[0], variables)? {
            Resolved::Unchanged => Operand::List(items.clone()),
            Resolved::All => return Ok(None),
            Resolved::Scalar(lit) => Operand::List(vec![lit]),
            Resolved::List(items) => Operand::List(items),
        },
        Operand::Single(lit) => match scalar(lit, variables)? {
            Some(lit) => Operand::Single(lit),
            None => return Ok(None),
        },
        Operand::Range(low, high) => match (scalar(low, variables)?, scalar(high, variables)?) {
            (Some(low), Some(high)) => Operand::Range(low, high),
            _ => return Ok(None),
        },
        Operand::List(items) => Operand::List(items.clone()),
    };

    Ok(Some(Comparison {
        key: comparison.key.clone(),
        operator: comparison.operator,
        operand,
    }))
}

/// Substitute variables throughout an expression.
///
/// Returns `None` when every condition was removed by an `__all__` selection.
pub fn substitute_variables(
    expr: &FilterExpr,
    variables: &HashMap<String, VariableItem>,
) -> Result<Option<FilterExpr>, QueryError> {
    if variables.is_empty() {
        return Ok(Some(expr.clone()));
    }
    Ok(match expr {
        FilterExpr::And(items) | FilterExpr::Or(items) => {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if let Some(item) = substitute_variables(item, variables)? {
                    kept.push(item);
                }
            }
            match kept.len() {
                0 => None,
                1 => kept.pop(),
                _ if matches!(expr, FilterExpr::And(_)) => Some(FilterExpr::And(kept)),
                _ => Some(FilterExpr::Or(kept)),
            }
        }
        FilterExpr::Not(inner) => {
            substitute_variables(inner, variables)?.map(|inner| FilterExpr::Not(Box::new(inner)))
        }
        FilterExpr::Group(inner) => {
            substitute_variables(inner, variables)?.map(|inner| FilterExpr::Group(Box::new(inner)))
        }
        FilterExpr::Comparison(comparison) => {
            substitute_comparison(comparison, variables)?.map(FilterExpr::Comparison)
        }
        FilterExpr::Function(_) | FilterExpr::FullText(_) => Some(expr.clone()),
    })
}

/// Render `expression` with variables substituted.
///
/// Blank input and expressions whose conditions were all removed render as
/// an empty string.
pub fn replace_variables_in_expression(
    expression: &str,
    variables: &HashMap<String, VariableItem>,
) -> Result<String, QueryError> {
    if expression.trim().is_empty() {
        return Ok(String::new());
    }
    let parsed = parse_filter(expression)?;
    Ok(substitute_variables(&parsed, variables)?
        .map(|expr| expr.to_string())
        .unwrap_or_default())
}
