//! Display helpers of the expressions

use std::fmt::{Debug, Display, Formatter, Result};

use super::PhysicalExpr;

/// Display the expression tree in a single line, for example `(#1) IS NULL`. Used in the
/// error messages
pub struct CompactExprDisplayWrapper<'a>(&'a dyn PhysicalExpr);

impl<'a> CompactExprDisplayWrapper<'a> {
    /// Wrap the expression
    pub fn new(expr: &'a dyn PhysicalExpr) -> Self {
        Self(expr)
    }
}

impl Debug for CompactExprDisplayWrapper<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_tuple("CompactExprDisplayWrapper")
            .field(&self.0.name())
            .finish()
    }
}

impl Display for CompactExprDisplayWrapper<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.0.compact_display(f)
    }
}

/// Write the expressions as a list: `[#0, (#1) IS NULL]`
pub fn compact_display_expressions<E, I>(f: &mut Formatter<'_>, exprs: I) -> Result
where
    E: AsRef<dyn PhysicalExpr>,
    I: IntoIterator<Item = E>,
{
    f.write_str("[")?;
    for (index, expr) in exprs.into_iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        expr.as_ref().compact_display(f)?;
    }
    f.write_str("]")
}
