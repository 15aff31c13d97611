use common::model::{Signal, TelemetryFieldKey};

use super::operator::FilterOperator;

/// Errors raised while compiling a filter into SQL.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("column not found for key {0}")]
    ColumnNotFound(TelemetryFieldKey),
    #[error("between operator requires exactly two values")]
    BetweenValues,
    #[error("in operator requires a non-empty list of values")]
    InValues,
    /// For `ConditionBuilder` implementations that support only some
    /// operators. The resource builder matches every operator and never
    /// returns it.
    #[error("unsupported operator {0:?}")]
    UnsupportedOperator(FilterOperator),
    #[error("unsupported signal '{}'", .0.as_str())]
    UnsupportedSignal(Signal),
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("invalid filter expression: {}", .0.join("; "))]
    InvalidInput(Vec<String>),
    #[error("variable error: {0}")]
    Variable(String),
}

impl QueryError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        QueryError::Syntax {
            position,
            message: message.into(),
        }
    }
}
