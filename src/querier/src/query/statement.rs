use common::model::Value;
use serde::{Deserialize, Serialize};

/// A parameterized SQL statement with `?` placeholders bound positionally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub query: String,
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Collects positional arguments while SQL fragments are rendered.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    args: Vec<Value>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its placeholder.
    pub fn var(&mut self, value: impl Into<Value>) -> &'static str {
        self.args.push(value.into());
        "?"
    }

    /// `(a AND b AND ...)`
    pub fn and<S: AsRef<str>>(parts: &[S]) -> String {
        Self::join(parts, " AND ")
    }

    /// `(a OR b OR ...)`
    pub fn or<S: AsRef<str>>(parts: &[S]) -> String {
        Self::join(parts, " OR ")
    }

    fn join<S: AsRef<str>>(parts: &[S], sep: &str) -> String {
        let body = parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(sep);
        format!("({body})")
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Value> {
        self.args
    }
}

/// Minimal `SELECT ... FROM ... WHERE ...` assembly.
#[derive(Debug, Default)]
pub struct SelectBuilder {
    columns: Vec<String>,
    table: String,
    conditions: Vec<String>,
    args: Vec<Value>,
}

impl SelectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Add a condition whose placeholders are bound by `args`, in order.
    pub fn where_expr(mut self, condition: impl Into<String>, args: Vec<Value>) -> Self {
        self.conditions.push(condition.into());
        self.args.extend(args);
        self
    }

    pub fn build(self) -> Statement {
        let mut query = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        if !self.conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&self.conditions.join(" AND "));
        }
        Statement {
            query,
            args: self.args,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_binds_in_order() {
        let mut sb = SqlBuilder::new();
        let cond = format!("a = {} AND b = {}", sb.var("x"), sb.var(2i64));
        assert_eq!(cond, "a = ? AND b = ?");
        assert_eq!(sb.into_args(), vec![Value::from("x"), Value::Int64(2)]);
    }

    #[test]
    fn test_and_or_wrap_parts() {
        assert_eq!(SqlBuilder::and(&["a", "b"]), "(a AND b)");
        assert_eq!(SqlBuilder::or(&["a"]), "(a)");
    }

    #[test]
    fn test_select_builder() {
        let stmt = SelectBuilder::new()
            .select("fingerprint")
            .from("resources")
            .where_expr("x = ?", vec![Value::from("v")])
            .where_expr("ts >= ?", vec![Value::Int64(10)])
            .build();
        assert_eq!(
            stmt.query,
            "SELECT fingerprint FROM resources WHERE x = ? AND ts >= ?"
        );
        assert_eq!(stmt.args, vec![Value::from("v"), Value::Int64(10)]);

        let stmt = SelectBuilder::new().select("a").from("t").build();
        assert_eq!(stmt.query, "SELECT a FROM t");
    }
}
