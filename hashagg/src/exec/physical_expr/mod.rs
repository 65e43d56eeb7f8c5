//! PhysicalExpression that can be interpreted/evaluated against a row

pub mod arith;
pub mod constant;
pub mod field_ref;
pub mod function;
pub mod is_null;
pub mod utils;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use snafu::Snafu;
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::TupleRef;
use tuple_block::types::LogicalType;

use self::utils::CompactExprDisplayWrapper;
use crate::error::SendableError;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum ExprError {
    #[snafu(display("Failed to evaluate the `{}` expression", expr))]
    Evaluate { expr: String, source: SendableError },
}

type Result<T> = std::result::Result<T, ExprError>;
pub(crate) type ExprResult<T> = Result<T>;

/// Stringify the [`PhysicalExpr`]
pub trait Stringify {
    /// Name of the expression
    fn name(&self) -> &'static str;

    /// Debug message
    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;

    /// Display the expression **without** children info
    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;

    /// Display the expression **with** children info in one line. Used in the error
    /// message and in the display of the operator
    fn compact_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
}

/// Trait for all of the physical expressions
pub trait PhysicalExpr: Stringify + Send + Sync {
    /// `as_any` for downcast
    fn as_any(&self) -> &dyn std::any::Any;

    /// Output type of the expression
    fn output_type(&self) -> LogicalType;

    /// Get children of this expression
    fn children(&self) -> &[Arc<dyn PhysicalExpr>];

    /// Evaluate the expression against the row. `None` is the `NULL`.
    ///
    /// The evaluation is side-effect free: evaluating the same expression against the
    /// same row always produces the same result. Implementation should evaluate the
    /// children internally. Non-null result has the physical type of the
    /// [`output_type`](Self::output_type)
    fn evaluate<'a>(&'a self, row: TupleRef<'a>) -> Result<Option<ScalarRef<'a>>>;
}

impl Debug for dyn PhysicalExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.debug(f)
    }
}

impl Display for dyn PhysicalExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

/// Error context of the expression that failed to evaluate
#[inline]
pub(crate) fn evaluate_context(expr: &dyn PhysicalExpr) -> EvaluateSnafu<String> {
    EvaluateSnafu {
        expr: CompactExprDisplayWrapper::new(expr).to_string(),
    }
}
