//! [`FieldRef`] expression

use std::sync::Arc;

use snafu::{ensure, ResultExt, Snafu};
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::TupleRef;
use tuple_block::types::LogicalType;

use super::{evaluate_context, ExprResult, PhysicalExpr, Stringify};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum FieldRefError {
    #[snafu(display(
        "FieldIndex: `{}` is out of range. The input row only has {} slots. Planner should guarantee it never happens, planner has fatal bug 😭",
        field_index,
        num_slots
    ))]
    IndexOutOfRange { field_index: usize, num_slots: usize },
    #[snafu(display(
        "FieldIndex: `{}` has logical type: `{}`, however, output's logical type is: `{}`",
        field_index,
        input_logical_type,
        output_logical_type
    ))]
    TypeMismatch {
        field_index: usize,
        input_logical_type: LogicalType,
        output_logical_type: LogicalType,
    },
}

/// Represents index into the row that pass through the expression
#[derive(Debug)]
pub struct FieldRef {
    /// Index of the field
    field_index: usize,
    /// Output type of the field
    output_type: LogicalType,
    /// It should always be empty! It can not have children
    children: Vec<Arc<dyn PhysicalExpr>>,
}

impl FieldRef {
    /// Create a new [`FieldRef`]
    #[inline]
    pub fn new(field_index: usize, output_type: LogicalType) -> Self {
        Self {
            field_index,
            output_type,
            children: Vec::new(),
        }
    }

    /// Index of the field in the row
    #[inline]
    pub fn field_index(&self) -> usize {
        self.field_index
    }

    fn check(&self, row: &TupleRef<'_>) -> Result<(), FieldRefError> {
        ensure!(
            self.field_index < row.num_slots(),
            IndexOutOfRangeSnafu {
                field_index: self.field_index,
                num_slots: row.num_slots()
            }
        );
        let input_logical_type = row.descriptor().slots()[self.field_index].logical_type();
        ensure!(
            input_logical_type == self.output_type,
            TypeMismatchSnafu {
                field_index: self.field_index,
                input_logical_type,
                output_logical_type: self.output_type
            }
        );
        Ok(())
    }
}

impl Stringify for FieldRef {
    fn name(&self) -> &'static str {
        "FieldRef"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.field_index)
    }

    fn compact_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

impl PhysicalExpr for FieldRef {
    #[inline]
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    #[inline]
    fn output_type(&self) -> LogicalType {
        self.output_type
    }

    #[inline]
    fn children(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.children
    }

    #[inline]
    fn evaluate<'a>(&'a self, row: TupleRef<'a>) -> ExprResult<Option<ScalarRef<'a>>> {
        self.check(&row)
            .boxed()
            .with_context(|_| evaluate_context(self))?;
        Ok(row.get(self.field_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tuple_block::batch::RowBatch;
    use tuple_block::tuple::TupleDescriptor;

    #[test]
    fn test_field_ref() {
        let mut batch = RowBatch::new(
            Arc::new(TupleDescriptor::new([
                LogicalType::VarChar,
                LogicalType::Integer,
            ])),
            1,
        );
        batch
            .push_row(&[Some(ScalarRef::String("curry")), None])
            .unwrap();

        let expr = FieldRef::new(0, LogicalType::VarChar);
        assert_eq!(
            expr.evaluate(batch.row(0)).unwrap(),
            Some(ScalarRef::String("curry"))
        );
        let expr = FieldRef::new(1, LogicalType::Integer);
        assert_eq!(expr.evaluate(batch.row(0)).unwrap(), None);

        let expr = FieldRef::new(2, LogicalType::Integer);
        let err = expr.evaluate(batch.row(0)).unwrap_err();
        assert_eq!(err.to_string(), "Failed to evaluate the `#2` expression");

        let expr = FieldRef::new(1, LogicalType::BigInt);
        assert!(expr.evaluate(batch.row(0)).is_err());
    }
}
