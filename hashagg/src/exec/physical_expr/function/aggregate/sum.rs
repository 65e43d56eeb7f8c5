//! Sum the numeric input
//!
//! Integers are summed into `BigInt` with wrapping addition, floats are summed into
//! `Double` with the IEEE addition in the arrival order. Sum of zero non-null rows is
//! `NULL`

use std::sync::Arc;

use num_traits::AsPrimitive;
use snafu::ensure;
use tuple_block::pool::MemPool;
use tuple_block::scalar::{NativeType, ScalarRef};
use tuple_block::tuple::{SlotDescriptor, TuplePtr};
use tuple_block::types::LogicalType;

use super::{
    display_unary, finalize_by_copy, unexpected_input, AggregationFunction, AggregationKind,
    AggregationMode, ArgTypeMismatchSnafu, Result, Stringify,
};
use crate::exec::physical_expr::function::Function;
use crate::exec::physical_expr::PhysicalExpr;

/// Trait for all of the types that can be result of sum
pub trait SumType: NativeType {
    /// Add the rhs to self
    fn sum(self, rhs: Self) -> Self;
}

impl SumType for i64 {
    #[inline]
    fn sum(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }
}

impl SumType for f64 {
    #[inline]
    fn sum(self, rhs: Self) -> Self {
        self + rhs
    }
}

/// Add the value into the sum stored in the slot
///
/// # Safety
///
/// The slot is a live slot with physical type `S::PHYSICAL_TYPE`
#[inline]
pub(crate) unsafe fn accumulate<S: SumType>(tuple: TuplePtr, slot: &SlotDescriptor, value: S) {
    unsafe {
        if tuple.is_null(slot) {
            tuple.write_native(slot, value);
        } else {
            let sum = tuple.read_native::<S>(slot);
            tuple.write_native(slot, sum.sum(value));
        }
    }
}

/// Cast the input to the sum type and accumulate it
///
/// # Safety
///
/// See [`accumulate`]
#[inline]
pub(crate) unsafe fn accumulate_as<I, S>(tuple: TuplePtr, slot: &SlotDescriptor, value: I)
where
    I: NativeType + AsPrimitive<S>,
    S: SumType,
{
    unsafe { accumulate::<S>(tuple, slot, value.as_()) }
}

/// Aggregation function that sum the numeric input
#[derive(Debug)]
pub struct Sum {
    args: Vec<Arc<dyn PhysicalExpr>>,
    mode: AggregationMode,
    sum_type: LogicalType,
}

impl Sum {
    /// Create a new sum function. In merge mode, the arg is the sum produced by the
    /// previous stage
    pub fn try_new(arg: Arc<dyn PhysicalExpr>, mode: AggregationMode) -> Result<Self> {
        let arg_type = arg.output_type();
        let sum_type = match mode {
            AggregationMode::Update => {
                ensure!(
                    arg_type.is_numeric(),
                    ArgTypeMismatchSnafu {
                        func: "Sum",
                        mode,
                        arg_type
                    }
                );
                if arg_type.is_integer() {
                    LogicalType::BigInt
                } else {
                    LogicalType::Double
                }
            }
            AggregationMode::Merge => {
                ensure!(
                    matches!(arg_type, LogicalType::BigInt | LogicalType::Double),
                    ArgTypeMismatchSnafu {
                        func: "Sum",
                        mode,
                        arg_type
                    }
                );
                arg_type
            }
        };
        Ok(Self {
            args: vec![arg],
            mode,
            sum_type,
        })
    }
}

impl Stringify for Sum {
    fn name(&self) -> &'static str {
        "Sum"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display_unary(f, "Sum", self.mode, &*self.args[0])
    }
}

impl Function for Sum {
    fn arguments(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.args
    }

    fn return_type(&self) -> LogicalType {
        self.sum_type
    }
}

impl AggregationFunction for Sum {
    fn kind(&self) -> AggregationKind {
        AggregationKind::Sum
    }

    fn mode(&self) -> AggregationMode {
        self.mode
    }

    fn intermediate_type(&self) -> LogicalType {
        self.sum_type
    }

    unsafe fn init(&self, tuple: TuplePtr, slot: &SlotDescriptor, _pool: &MemPool) -> Result<()> {
        unsafe { tuple.set_null(slot) };
        Ok(())
    }

    #[inline]
    unsafe fn update(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        args: &[Option<ScalarRef<'_>>],
        _pool: &MemPool,
    ) -> Result<()> {
        let Some(value) = args[0] else {
            return Ok(());
        };
        unsafe {
            match (value, self.sum_type) {
                (ScalarRef::Int8(v), LogicalType::BigInt) => {
                    accumulate_as::<i8, i64>(tuple, slot, v)
                }
                (ScalarRef::Int16(v), LogicalType::BigInt) => {
                    accumulate_as::<i16, i64>(tuple, slot, v)
                }
                (ScalarRef::Int32(v), LogicalType::BigInt) => {
                    accumulate_as::<i32, i64>(tuple, slot, v)
                }
                (ScalarRef::Int64(v), LogicalType::BigInt) => {
                    accumulate_as::<i64, i64>(tuple, slot, v)
                }
                (ScalarRef::Float32(v), LogicalType::Double) => {
                    accumulate_as::<f32, f64>(tuple, slot, v)
                }
                (ScalarRef::Float64(v), LogicalType::Double) => {
                    accumulate_as::<f64, f64>(tuple, slot, v)
                }
                (value, _) => return Err(unexpected_input(self.name(), value)),
            }
        }
        Ok(())
    }

    #[inline]
    unsafe fn merge(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        partial: Option<ScalarRef<'_>>,
        _pool: &MemPool,
    ) -> Result<()> {
        // Sum of an empty partition is NULL, it does not contribute
        let Some(partial) = partial else {
            return Ok(());
        };
        unsafe {
            match (partial, self.sum_type) {
                (ScalarRef::Int64(v), LogicalType::BigInt) => accumulate::<i64>(tuple, slot, v),
                (ScalarRef::Float64(v), LogicalType::Double) => accumulate::<f64>(tuple, slot, v),
                (partial, _) => return Err(unexpected_input(self.name(), partial)),
            }
        }
        Ok(())
    }

    unsafe fn finalize(
        &self,
        src: TuplePtr,
        src_slot: &SlotDescriptor,
        dst: TuplePtr,
        dst_slot: &SlotDescriptor,
        pool: &MemPool,
    ) -> Result<()> {
        unsafe { finalize_by_copy(self.name(), src, src_slot, dst, dst_slot, pool) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::physical_expr::field_ref::FieldRef;
    use crate::exec::physical_expr::function::aggregate::tests::TestTuple;
    use tuple_block::scalar::ScalarImpl;

    fn sum(arg_type: LogicalType, mode: AggregationMode) -> Sum {
        Sum::try_new(Arc::new(FieldRef::new(0, arg_type)), mode).unwrap()
    }

    #[test]
    fn test_sum_integers_wraps() {
        let func = sum(LogicalType::Integer, AggregationMode::Update);
        assert_eq!(func.return_type(), LogicalType::BigInt);
        let state = TestTuple::new(&func);
        assert_eq!(state.value(), None);
        state.update(&func, &[Some(ScalarRef::Int32(i32::MAX))]);
        state.update(&func, &[None]);
        state.update(&func, &[Some(ScalarRef::Int32(1))]);
        assert_eq!(
            state.finalize(&func),
            Some(ScalarImpl::Int64(i32::MAX as i64 + 1))
        );

        let func = sum(LogicalType::BigInt, AggregationMode::Update);
        let state = TestTuple::new(&func);
        state.update(&func, &[Some(ScalarRef::Int64(i64::MAX))]);
        state.update(&func, &[Some(ScalarRef::Int64(1))]);
        assert_eq!(state.value(), Some(ScalarRef::Int64(i64::MIN)));
    }

    #[test]
    fn test_sum_floats() {
        let func = sum(LogicalType::Float, AggregationMode::Update);
        assert_eq!(func.intermediate_type(), LogicalType::Double);
        let state = TestTuple::new(&func);
        state.update(&func, &[Some(ScalarRef::Float32(1.5))]);
        state.update(&func, &[Some(ScalarRef::Float32(-0.25))]);
        assert_eq!(state.value(), Some(ScalarRef::Float64(1.25)));
    }

    #[test]
    fn test_sum_of_nulls_is_null() {
        let func = sum(LogicalType::SmallInt, AggregationMode::Update);
        let state = TestTuple::new(&func);
        state.update(&func, &[None]);
        assert_eq!(state.finalize(&func), None);
    }

    #[test]
    fn test_merge_sum() {
        let func = sum(LogicalType::BigInt, AggregationMode::Merge);
        let state = TestTuple::new(&func);
        state.merge(&func, None);
        assert_eq!(state.value(), None);
        state.merge(&func, Some(ScalarRef::Int64(4)));
        state.merge(&func, Some(ScalarRef::Int64(-6)));
        assert_eq!(state.value(), Some(ScalarRef::Int64(-2)));

        assert!(Sum::try_new(
            Arc::new(FieldRef::new(0, LogicalType::Integer)),
            AggregationMode::Merge
        )
        .is_err());
        assert!(Sum::try_new(
            Arc::new(FieldRef::new(0, LogicalType::VarChar)),
            AggregationMode::Update
        )
        .is_err());
    }
}
