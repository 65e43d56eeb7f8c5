//! Expression that contains the user literally specified constant

use std::sync::Arc;

use snafu::{ensure, Snafu};
use tuple_block::scalar::{ScalarImpl, ScalarRef};
use tuple_block::tuple::TupleRef;
use tuple_block::types::{LogicalType, PhysicalType};

use super::{ExprResult, PhysicalExpr, Stringify};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(display(
    "Constant with physical type `{:?}` can not have logical type `{}`",
    physical_type,
    logical_type
))]
pub struct ConstantError {
    physical_type: PhysicalType,
    logical_type: LogicalType,
}

/// Expression that contains the user literally specified constant
#[derive(Debug)]
pub struct Constant {
    logical_type: LogicalType,
    value: Option<ScalarImpl>,
    children: Vec<Arc<dyn PhysicalExpr>>,
}

impl Constant {
    /// Create a new constant. `None` is the `NULL` of the `logical_type`
    pub fn try_new(
        logical_type: LogicalType,
        value: Option<ScalarImpl>,
    ) -> Result<Self, ConstantError> {
        if let Some(value) = &value {
            ensure!(
                value.physical_type() == logical_type.physical_type(),
                ConstantSnafu {
                    physical_type: value.physical_type(),
                    logical_type
                }
            );
        }
        Ok(Self {
            logical_type,
            value,
            children: Vec::new(),
        })
    }
}

impl Stringify for Constant {
    fn name(&self) -> &'static str {
        "Constant"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "Null"),
        }
    }

    fn compact_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

impl PhysicalExpr for Constant {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn children(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.children
    }

    fn output_type(&self) -> LogicalType {
        self.logical_type
    }

    #[inline]
    fn evaluate<'a>(&'a self, _row: TupleRef<'a>) -> ExprResult<Option<ScalarRef<'a>>> {
        Ok(self.value.as_ref().map(|value| value.as_scalar_ref()))
    }
}
