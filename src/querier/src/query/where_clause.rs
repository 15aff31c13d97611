//! Compiles a filter expression into a SQL `WHERE` fragment.
//!
//! Leaves are rendered by a [`ConditionBuilder`]. Leaves that cannot narrow
//! the target table render as `true` (or nothing, for skipped leaves), and
//! the logical combinators simplify those away so the output never contains
//! `NOT (true)` or empty groups.

use std::collections::{HashMap, HashSet};

use common::model::{FieldContext, TelemetryFieldKey, Value, VariableItem};
use log::debug;

use super::error::QueryError;
use super::filter::{Comparison, FilterExpr, FunctionCall, FunctionName, Operand, parse_filter};
use super::keys::resolve_key_text;
use super::operator::FilterOperator;
use super::statement::SqlBuilder;
use super::variables::substitute_variables;
use super::{ConditionBuilder, FieldMapper};

/// Fragment for conditions that cannot narrow the target table.
pub const TRUE_CONDITION: &str = "true";

pub const LIKE_WITHOUT_WILDCARD_WARNING: &str = "LIKE operator used without wildcards (% or _). Consider using = operator for exact matches or add wildcards for pattern matching.";

/// A compiled `WHERE` fragment with its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWhereClause {
    pub condition: String,
    pub args: Vec<Value>,
    pub warnings: Vec<String>,
}

/// Inputs and switches for [`prepare_where_clause`].
pub struct FilterCompilerOptions<'a> {
    pub field_mapper: &'a dyn FieldMapper,
    pub condition_builder: &'a dyn ConditionBuilder,
    /// Keys known for each referenced name, as returned by the metadata store.
    pub field_keys: &'a HashMap<String, Vec<TelemetryFieldKey>>,
    pub full_text_column: Option<&'a TelemetryFieldKey>,
    pub variables: Option<&'a HashMap<String, VariableItem>>,
    pub skip_resource_filter: bool,
    pub skip_full_text_filter: bool,
    pub skip_function_calls: bool,
    pub ignore_not_found_keys: bool,
}

impl<'a> FilterCompilerOptions<'a> {
    pub fn new(
        field_mapper: &'a dyn FieldMapper,
        condition_builder: &'a dyn ConditionBuilder,
        field_keys: &'a HashMap<String, Vec<TelemetryFieldKey>>,
    ) -> Self {
        Self {
            field_mapper,
            condition_builder,
            field_keys,
            full_text_column: None,
            variables: None,
            skip_resource_filter: false,
            skip_full_text_filter: false,
            skip_function_calls: false,
            ignore_not_found_keys: false,
        }
    }

    pub fn with_variables(mut self, variables: &'a HashMap<String, VariableItem>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_full_text_column(mut self, column: &'a TelemetryFieldKey) -> Self {
        self.full_text_column = Some(column);
        self
    }
}

/// Compile `expression` into a `WHERE` fragment.
///
/// Returns `None` for blank input. Any other expression yields a clause,
/// `true` when nothing in it applies to the target table.
pub fn prepare_where_clause(
    expression: &str,
    opts: &FilterCompilerOptions<'_>,
) -> Result<Option<PreparedWhereClause>, QueryError> {
    if expression.trim().is_empty() {
        return Ok(None);
    }

    let parsed = parse_filter(expression)?;
    let parsed = match opts.variables {
        Some(variables) => substitute_variables(&parsed, variables)?,
        None => Some(parsed),
    };

    let mut visitor = WhereClauseVisitor::new(opts);
    let fragment = match &parsed {
        Some(expr) => visitor.visit(expr),
        None => Fragment::True,
    };

    if !visitor.errors.is_empty() {
        return Err(collect_errors(visitor.errors));
    }

    let (condition, args) = match fragment {
        Fragment::Sql(condition, args) => (condition, args),
        Fragment::True | Fragment::Empty => (TRUE_CONDITION.to_string(), Vec::new()),
    };
    debug!("Compiled filter '{expression}' into '{condition}'");

    Ok(Some(PreparedWhereClause {
        condition,
        args,
        warnings: visitor.warnings,
    }))
}

fn collect_errors(mut errors: Vec<QueryError>) -> QueryError {
    if errors.len() == 1 {
        return errors.remove(0);
    }
    let messages = errors
        .into_iter()
        .flat_map(|err| match err {
            QueryError::InvalidInput(messages) => messages,
            other => vec![other.to_string()],
        })
        .collect();
    QueryError::InvalidInput(messages)
}

/// Rendered form of a subexpression. Each SQL fragment carries its own
/// arguments so fragments dropped during simplification take theirs along.
#[derive(Debug)]
enum Fragment {
    /// Skipped leaf. Contributes nothing.
    Empty,
    /// Trivially satisfied.
    True,
    Sql(String, Vec<Value>),
}

impl Fragment {
    fn and(parts: Vec<Fragment>) -> Fragment {
        let mut saw_true = false;
        let mut conditions = Vec::new();
        let mut args = Vec::new();
        for part in parts {
            match part {
                Fragment::Empty => {}
                Fragment::True => saw_true = true,
                Fragment::Sql(condition, part_args) => {
                    conditions.push(condition);
                    args.extend(part_args);
                }
            }
        }
        match conditions.len() {
            0 if saw_true => Fragment::True,
            0 => Fragment::Empty,
            1 => Fragment::Sql(conditions.remove(0), args),
            _ => Fragment::Sql(SqlBuilder::and(&conditions), args),
        }
    }

    fn or(parts: Vec<Fragment>) -> Fragment {
        if parts.iter().all(|part| matches!(part, Fragment::Empty)) {
            return Fragment::Empty;
        }
        if parts.iter().any(|part| !matches!(part, Fragment::Sql(..))) {
            return Fragment::True;
        }
        let mut conditions = Vec::with_capacity(parts.len());
        let mut args = Vec::new();
        for part in parts {
            if let Fragment::Sql(condition, part_args) = part {
                conditions.push(condition);
                args.extend(part_args);
            }
        }
        if conditions.len() == 1 {
            return Fragment::Sql(conditions.remove(0), args);
        }
        Fragment::Sql(SqlBuilder::or(&conditions), args)
    }

    fn map_sql(self, f: impl FnOnce(String) -> String) -> Fragment {
        match self {
            Fragment::Sql(condition, args) => Fragment::Sql(f(condition), args),
            other => other,
        }
    }
}

struct WhereClauseVisitor<'o, 'a> {
    opts: &'o FilterCompilerOptions<'a>,
    errors: Vec<QueryError>,
    warnings: Vec<String>,
    warned: HashSet<String>,
}

impl<'o, 'a> WhereClauseVisitor<'o, 'a> {
    fn new(opts: &'o FilterCompilerOptions<'a>) -> Self {
        Self {
            opts,
            errors: Vec::new(),
            warnings: Vec::new(),
            warned: HashSet::new(),
        }
    }

    fn warn(&mut self, message: String) {
        if self.warned.insert(message.clone()) {
            self.warnings.push(message);
        }
    }

    fn visit(&mut self, expr: &FilterExpr) -> Fragment {
        match expr {
            FilterExpr::And(items) => {
                let parts = items.iter().map(|item| self.visit(item)).collect();
                Fragment::and(parts)
            }
            FilterExpr::Or(items) => {
                let parts = items.iter().map(|item| self.visit(item)).collect();
                Fragment::or(parts)
            }
            FilterExpr::Not(inner) => self.visit(inner).map_sql(|c| format!("NOT ({c})")),
            FilterExpr::Group(inner) => self.visit(inner).map_sql(|c| format!("({c})")),
            FilterExpr::Comparison(comparison) => self.visit_comparison(comparison),
            FilterExpr::Function(call) => self.visit_function(call),
            FilterExpr::FullText(text) => self.visit_full_text(text),
        }
    }

    fn resolve_keys(&mut self, text: &str) -> Vec<TelemetryFieldKey> {
        let resolved = resolve_key_text(text, self.opts.field_keys);
        if let Some(warning) = resolved.warning {
            self.warn(warning);
        }
        let mut keys = resolved.keys;

        if keys.is_empty() {
            if !self.opts.ignore_not_found_keys {
                self.errors.push(QueryError::InvalidInput(vec![format!(
                    "key `{}` not found",
                    TelemetryFieldKey::from_key_text(text).name
                )]));
            }
            return keys;
        }

        if self.opts.skip_resource_filter {
            keys.retain(|key| key.field_context != FieldContext::Resource);
        }
        keys
    }

    fn render(
        &mut self,
        key: &TelemetryFieldKey,
        operator: FilterOperator,
        value: &Value,
    ) -> Option<Fragment> {
        let mut sb = SqlBuilder::new();
        match self
            .opts
            .condition_builder
            .condition_for(key, operator, value, &mut sb)
        {
            Ok(condition) if condition == TRUE_CONDITION => Some(Fragment::True),
            Ok(condition) => Some(Fragment::Sql(condition, sb.into_args())),
            Err(err) => {
                self.errors.push(err);
                None
            }
        }
    }

    fn visit_comparison(&mut self, comparison: &Comparison) -> Fragment {
        let keys = self.resolve_keys(&comparison.key);
        if keys.is_empty() {
            return Fragment::Empty;
        }

        let operator = comparison.operator;
        let value = operand_value(operator, &comparison.operand);

        if matches!(
            operator,
            FilterOperator::Like
                | FilterOperator::NotLike
                | FilterOperator::ILike
                | FilterOperator::NotILike
        ) && let Value::String(pattern) = &value
            && !pattern.contains(['%', '_'])
        {
            self.warn(LIKE_WITHOUT_WILDCARD_WARNING.to_string());
        }

        let mut parts = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.render(key, operator, &value) {
                Some(fragment) => parts.push(fragment),
                None => return Fragment::Empty,
            }
        }

        // A name stored under several keys matches if any of them does, and
        // a negative comparison has to hold for all of them.
        if operator.is_negative() {
            Fragment::and(parts)
        } else {
            Fragment::or(parts)
        }
    }

    fn visit_function(&mut self, call: &FunctionCall) -> Fragment {
        if self.opts.skip_function_calls {
            return Fragment::Empty;
        }

        let key = TelemetryFieldKey::from_key_text(&call.key);
        let is_body = key.field_context == FieldContext::Body;
        let args: Vec<Value> = call
            .args
            .iter()
            .map(|arg| operand_value(FilterOperator::In, arg))
            .collect();
        let Some(first) = args.first() else {
            self.errors.push(QueryError::InvalidInput(vec![format!(
                "function `{}` expects a value argument",
                call.name.as_str()
            )]));
            return Fragment::Empty;
        };

        let field = match call.name {
            FunctionName::HasToken if !(is_body && key.name.is_empty()) => {
                self.errors.push(QueryError::InvalidInput(vec![
                    "function `hasToken` only supports body field as first parameter".to_string(),
                ]));
                return Fragment::Empty;
            }
            FunctionName::Has | FunctionName::HasAny | FunctionName::HasAll if !is_body => {
                self.errors.push(QueryError::InvalidInput(vec![format!(
                    "function `{}` supports only body JSON search",
                    call.name.as_str()
                )]));
                return Fragment::Empty;
            }
            _ => match self.opts.field_mapper.field_for(&key) {
                Ok(field) => field,
                Err(err) => {
                    self.errors.push(err);
                    return Fragment::Empty;
                }
            },
        };

        let mut sb = SqlBuilder::new();
        let condition = match call.name {
            FunctionName::HasToken => {
                let token = match first {
                    Value::List(items) => items.first().cloned().unwrap_or(Value::Null),
                    other => other.clone(),
                };
                format!("hasToken(LOWER({field}), LOWER({}))", sb.var(token))
            }
            FunctionName::Has => {
                let needle = match first {
                    Value::List(items) => items.first().cloned().unwrap_or(Value::Null),
                    other => other.clone(),
                };
                format!("has({field}, {})", sb.var(needle))
            }
            FunctionName::HasAny | FunctionName::HasAll => {
                let values: Vec<Value> = args
                    .into_iter()
                    .flat_map(|arg| match arg {
                        Value::List(items) => items,
                        other => vec![other],
                    })
                    .collect();
                format!(
                    "{}({field}, {})",
                    call.name.as_str(),
                    sb.var(Value::List(values))
                )
            }
        };
        Fragment::Sql(condition, sb.into_args())
    }

    fn visit_full_text(&mut self, text: &str) -> Fragment {
        if self.opts.skip_full_text_filter {
            return Fragment::Empty;
        }
        let Some(column) = self.opts.full_text_column else {
            self.errors.push(QueryError::InvalidInput(vec![
                "full text search is not supported".to_string(),
            ]));
            return Fragment::Empty;
        };
        self.render(column, FilterOperator::Regexp, &Value::from(text))
            .unwrap_or(Fragment::Empty)
    }
}

/// The value a condition builder receives for an operand. `IN` always gets
/// a list and `BETWEEN` a two-element list.
fn operand_value(operator: FilterOperator, operand: &Operand) -> Value {
    match operand {
        Operand::None => Value::Null,
        Operand::Single(literal)
            if matches!(operator, FilterOperator::In | FilterOperator::NotIn) =>
        {
            Value::List(vec![literal.to_value()])
        }
        Operand::Single(literal) => literal.to_value(),
        Operand::Range(low, high) => Value::List(vec![low.to_value(), high.to_value()]),
        Operand::List(items) => Value::List(items.iter().map(|lit| lit.to_value()).collect()),
    }
}
