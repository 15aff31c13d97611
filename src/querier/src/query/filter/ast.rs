use std::fmt;

use common::model::Value;

use crate::query::operator::FilterOperator;

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    /// Explicit parentheses from the source text.
    Group(Box<FilterExpr>),
    Comparison(Comparison),
    Function(FunctionCall),
    FullText(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Raw key text, e.g. `resource.service.name:string`.
    pub key: String,
    pub operator: FilterOperator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `EXISTS` / `NOT EXISTS`
    None,
    Single(Literal),
    /// `BETWEEN low AND high`
    Range(Literal, Literal),
    List(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Quoted text with the quotes stripped and escapes resolved.
    Text(String),
    Number(f64),
    Bool(bool),
    /// Unquoted token, e.g. `redis` in `service.name = redis` or `$env`.
    Bare(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Text(s) | Literal::Bare(s) => Value::String(s.clone()),
            Literal::Number(n) => Value::Float64(*n),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }

    /// Name of the variable this literal may refer to.
    pub fn variable_name(&self) -> Option<&str> {
        match self {
            Literal::Bare(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    Has,
    HasAny,
    HasAll,
    HasToken,
}

impl FunctionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::Has => "has",
            FunctionName::HasAny => "hasAny",
            FunctionName::HasAll => "hasAll",
            FunctionName::HasToken => "hasToken",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: FunctionName,
    pub key: String,
    pub args: Vec<Operand>,
}

impl FilterExpr {
    /// Every key text referenced by comparisons and function calls.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::And(items) | FilterExpr::Or(items) => {
                for item in items {
                    item.collect_keys(out);
                }
            }
            FilterExpr::Not(inner) | FilterExpr::Group(inner) => inner.collect_keys(out),
            FilterExpr::Comparison(c) => out.push(&c.key),
            FilterExpr::Function(f) => out.push(&f.key),
            FilterExpr::FullText(_) => {}
        }
    }
}

/// Quote text for re-rendering, escaping backslashes and single quotes.
pub(crate) fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Text(s) => f.write_str(&quote(s)),
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Bare(s) => f.write_str(s),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Single(lit) => write!(f, "{lit}"),
            Operand::Range(low, high) => write!(f, "{low} AND {high}"),
            Operand::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::And(items) => join(f, items, " AND "),
            FilterExpr::Or(items) => join(f, items, " OR "),
            FilterExpr::Not(inner) => write!(f, "NOT {inner}"),
            FilterExpr::Group(inner) => write!(f, "({inner})"),
            FilterExpr::Comparison(c) => match c.operand {
                Operand::None => write!(f, "{} {}", c.key, c.operator.as_str()),
                _ => write!(f, "{} {} {}", c.key, c.operator.as_str(), c.operand),
            },
            FilterExpr::Function(call) => {
                write!(f, "{}({}", call.name.as_str(), call.key)?;
                for arg in &call.args {
                    write!(f, ", {arg}")?;
                }
                f.write_str(")")
            }
            FilterExpr::FullText(text) => f.write_str(&quote(text)),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[FilterExpr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
