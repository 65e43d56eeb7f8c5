//! Execution of the query

pub mod metric;
pub mod physical_expr;
pub mod physical_operator;
