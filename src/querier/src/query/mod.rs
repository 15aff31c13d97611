//! Filter compilation: key resolution, condition rendering and statement
//! assembly for the resource tables.

use common::model::{TelemetryFieldKey, Value};

use error::QueryError;
use operator::FilterOperator;
use statement::SqlBuilder;

pub mod error;
pub mod filter;
pub mod keys;
pub mod operator;
pub mod resource_filter;
pub mod statement;
pub mod variables;
pub mod where_clause;

/// Storage type of a physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    /// String column holding a flat JSON object.
    JsonString,
    UInt64,
}

/// A physical column in a target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
}

/// Maps logical field keys onto physical columns of one table.
pub trait FieldMapper: Send + Sync {
    fn column_for(&self, key: &TelemetryFieldKey) -> Result<Column, QueryError>;

    /// SQL expression reading the key's value.
    fn field_for(&self, key: &TelemetryFieldKey) -> Result<String, QueryError>;
}

/// Renders one `key <operator> value` predicate as SQL, binding arguments
/// through `sb`.
pub trait ConditionBuilder: Send + Sync {
    fn condition_for(
        &self,
        key: &TelemetryFieldKey,
        operator: FilterOperator,
        value: &Value,
        sb: &mut SqlBuilder,
    ) -> Result<String, QueryError>;
}

pub use error::QueryError as Error;
pub use statement::Statement;
