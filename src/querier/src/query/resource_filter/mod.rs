//! Statements selecting resource fingerprints for a query's filter.

pub mod condition_builder;
pub mod field_mapper;
pub mod statement_builder;

pub use condition_builder::ResourceConditionBuilder;
pub use field_mapper::ResourceFieldMapper;
pub use statement_builder::{ResourceFilterStatementBuilder, resource_table};
