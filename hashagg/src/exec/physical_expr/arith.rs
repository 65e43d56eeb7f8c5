//! Arithmetic between two expressions that have the same numeric type

use std::fmt::Display;
use std::sync::Arc;

use snafu::{ensure, ResultExt, Snafu};
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::TupleRef;
use tuple_block::types::LogicalType;

use super::{evaluate_context, ExprResult, PhysicalExpr, Stringify};

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOperator {
    /// +
    Add,
    /// -
    Sub,
    /// *
    Mul,
    /// /
    Div,
    /// %
    Rem,
}

impl ArithOperator {
    /// Get the symbol
    pub fn symbol_ident(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }
}

impl Display for ArithOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol_ident())
    }
}

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum ArithError {
    #[snafu(display(
        "Arithmetic `{}` `{}` `{}` is not supported, both sides should have the same numeric type",
        left,
        op,
        right
    ))]
    UnsupportedTypes {
        left: LogicalType,
        op: ArithOperator,
        right: LogicalType,
    },
    #[snafu(display("Division by zero"))]
    DivisionByZero,
    #[snafu(display(
        "Arithmetic input `{}` does not match the output type `{}`",
        input,
        output_type
    ))]
    InvalidInput { input: String, output_type: LogicalType },
}

/// Arithmetic expression. Integer arithmetic wraps on overflow, integer division and
/// remainder by zero are errors. Float arithmetic follows IEEE 754
#[derive(Debug)]
pub struct Arith {
    op: ArithOperator,
    output_type: LogicalType,
    children: Vec<Arc<dyn PhysicalExpr>>,
}

impl Arith {
    /// Create a new arithmetic expression
    pub fn try_new(
        left: Arc<dyn PhysicalExpr>,
        op: ArithOperator,
        right: Arc<dyn PhysicalExpr>,
    ) -> Result<Self, ArithError> {
        let output_type = left.output_type();
        ensure!(
            output_type.is_numeric() && output_type == right.output_type(),
            UnsupportedTypesSnafu {
                left: output_type,
                op,
                right: right.output_type()
            }
        );
        Ok(Self {
            op,
            output_type,
            children: vec![left, right],
        })
    }

    fn compute(
        &self,
        left: ScalarRef<'_>,
        right: ScalarRef<'_>,
    ) -> Result<ScalarRef<'static>, ArithError> {
        macro_rules! integer_arith {
            ($variant:ident, $l:expr, $r:expr) => {
                match self.op {
                    ArithOperator::Add => ScalarRef::$variant($l.wrapping_add($r)),
                    ArithOperator::Sub => ScalarRef::$variant($l.wrapping_sub($r)),
                    ArithOperator::Mul => ScalarRef::$variant($l.wrapping_mul($r)),
                    ArithOperator::Div => {
                        ensure!($r != 0, DivisionByZeroSnafu);
                        ScalarRef::$variant($l.wrapping_div($r))
                    }
                    ArithOperator::Rem => {
                        ensure!($r != 0, DivisionByZeroSnafu);
                        ScalarRef::$variant($l.wrapping_rem($r))
                    }
                }
            };
        }

        macro_rules! float_arith {
            ($variant:ident, $l:expr, $r:expr) => {
                match self.op {
                    ArithOperator::Add => ScalarRef::$variant($l + $r),
                    ArithOperator::Sub => ScalarRef::$variant($l - $r),
                    ArithOperator::Mul => ScalarRef::$variant($l * $r),
                    ArithOperator::Div => ScalarRef::$variant($l / $r),
                    ArithOperator::Rem => ScalarRef::$variant($l % $r),
                }
            };
        }

        let result = match (left, right) {
            (ScalarRef::Int8(l), ScalarRef::Int8(r)) => integer_arith!(Int8, l, r),
            (ScalarRef::Int16(l), ScalarRef::Int16(r)) => integer_arith!(Int16, l, r),
            (ScalarRef::Int32(l), ScalarRef::Int32(r)) => integer_arith!(Int32, l, r),
            (ScalarRef::Int64(l), ScalarRef::Int64(r)) => integer_arith!(Int64, l, r),
            (ScalarRef::Float32(l), ScalarRef::Float32(r)) => float_arith!(Float32, l, r),
            (ScalarRef::Float64(l), ScalarRef::Float64(r)) => float_arith!(Float64, l, r),
            (left, right) => {
                return InvalidInputSnafu {
                    input: format!("{:?} {} {:?}", left, self.op, right),
                    output_type: self.output_type,
                }
                .fail();
            }
        };
        Ok(result)
    }
}

impl Stringify for Arith {
    fn name(&self) -> &'static str {
        "Arith"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op)
    }

    fn compact_display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.children[0].compact_display(f)?;
        write!(f, " {} ", self.op)?;
        self.children[1].compact_display(f)
    }
}

impl PhysicalExpr for Arith {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn output_type(&self) -> LogicalType {
        self.output_type
    }

    fn children(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.children
    }

    fn evaluate<'a>(&'a self, row: TupleRef<'a>) -> ExprResult<Option<ScalarRef<'a>>> {
        let left = self.children[0].evaluate(row)?;
        let right = self.children[1].evaluate(row)?;
        let (Some(left), Some(right)) = (left, right) else {
            return Ok(None);
        };
        self.compute(left, right)
            .map(Some)
            .boxed()
            .with_context(|_| evaluate_context(self))
    }
}
