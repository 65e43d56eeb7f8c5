//! Check the input is null

use std::sync::Arc;

use snafu::ResultExt;
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::TupleRef;
use tuple_block::types::LogicalType;

use super::{evaluate_context, ExprResult, PhysicalExpr, Stringify};

/// The expression used to check the input is (not) null. It never returns `NULL`
#[derive(Debug)]
pub struct IsNull<const NOT: bool> {
    children: Vec<Arc<dyn PhysicalExpr>>,
}

impl<const NOT: bool> IsNull<NOT> {
    /// Create a new [`IsNull`]
    pub fn new(input: Arc<dyn PhysicalExpr>) -> Self {
        Self {
            children: vec![input],
        }
    }
}

impl<const NOT: bool> Stringify for IsNull<NOT> {
    fn name(&self) -> &'static str {
        if NOT { "IS NOT NULL" } else { "IS NULL" }
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }

    fn compact_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        self.children[0].compact_display(f)?;
        write!(f, ") {}", self.name())
    }
}

impl<const NOT: bool> PhysicalExpr for IsNull<NOT> {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn output_type(&self) -> LogicalType {
        LogicalType::Boolean
    }

    fn children(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.children
    }

    fn evaluate<'a>(&'a self, row: TupleRef<'a>) -> ExprResult<Option<ScalarRef<'a>>> {
        let input = self.children[0]
            .evaluate(row)
            .boxed()
            .with_context(|_| evaluate_context(self))?;
        Ok(Some(ScalarRef::Boolean(input.is_none() ^ NOT)))
    }
}
