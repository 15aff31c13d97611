//! Filter expression grammar.

pub mod ast;
pub mod parser;

pub use ast::{Comparison, FilterExpr, FunctionCall, FunctionName, Literal, Operand};
pub use parser::parse_filter;
