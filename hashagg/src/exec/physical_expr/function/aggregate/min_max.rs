//! Min/Max function
//!
//! `NaN` is never smaller or greater than other values: it only becomes the result when
//! it is the first non-null value the slot sees

use std::cmp::Ordering;
use std::sync::Arc;

use snafu::ResultExt;
use tuple_block::pool::MemPool;
use tuple_block::scalar::{NativeType, ScalarRef};
use tuple_block::tuple::{SlotDescriptor, TuplePtr};
use tuple_block::types::LogicalType;

use super::{
    display_unary, finalize_by_copy, unexpected_input, AggregationFunction, AggregationKind,
    AggregationMode, AllocateSnafu, Result, Stringify,
};
use crate::exec::physical_expr::function::Function;
use crate::exec::physical_expr::PhysicalExpr;

/// Min function
pub type Min = MinMax<true>;
/// Max function
pub type Max = MinMax<false>;

/// Update the native value in the slot if the value is smaller/greater
///
/// # Safety
///
/// The slot is a live slot with physical type `T::PHYSICAL_TYPE`
#[inline]
pub(crate) unsafe fn update_native<T: NativeType, const IS_MIN: bool>(
    tuple: TuplePtr,
    slot: &SlotDescriptor,
    value: T,
) {
    unsafe {
        if tuple.is_null(slot) {
            tuple.write_native(slot, value);
            return;
        }
        let current = tuple.read_native::<T>(slot);
        let replace = if IS_MIN {
            value < current
        } else {
            value > current
        };
        if replace {
            tuple.write_native(slot, value);
        }
    }
}

/// Aggregation function that computes the min/max value
#[derive(Debug)]
pub struct MinMax<const IS_MIN: bool> {
    args: Vec<Arc<dyn PhysicalExpr>>,
    mode: AggregationMode,
}

impl<const IS_MIN: bool> MinMax<IS_MIN> {
    /// Create a new min/max function, values of all of the types can be compared
    pub fn try_new(arg: Arc<dyn PhysicalExpr>, mode: AggregationMode) -> Result<Self> {
        Ok(Self {
            args: vec![arg],
            mode,
        })
    }

    fn name_() -> &'static str {
        if IS_MIN { "Min" } else { "Max" }
    }

    /// Update the slot with the scalar, the var-len value is copied into the pool when
    /// it replaces the current value
    #[inline]
    unsafe fn update_scalar(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        value: ScalarRef<'_>,
        pool: &MemPool,
    ) -> Result<()> {
        macro_rules! update_native_scalar {
            ($({$variant:ident, $ty:ty, $physical:ident}),*) => {
                match value {
                    $(
                        ScalarRef::$variant(v) => {
                            unsafe { update_native::<$ty, IS_MIN>(tuple, slot, v) };
                            return Ok(());
                        }
                    )*
                    _ => (),
                }
            };
        }

        if value.physical_type() != slot.physical_type() {
            return Err(unexpected_input(Self::name_(), value));
        }

        tuple_block::for_all_native_types!(update_native_scalar);

        // Boolean and variable length values
        let replace = match unsafe { tuple.get(slot) } {
            None => true,
            Some(current) => {
                let expect = if IS_MIN {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                value.partial_cmp_same_type(&current) == Some(expect)
            }
        };
        if replace {
            unsafe {
                tuple
                    .set(slot, Some(value), pool)
                    .context(AllocateSnafu {
                        func: Self::name_(),
                    })?;
            }
        }
        Ok(())
    }
}

impl<const IS_MIN: bool> Stringify for MinMax<IS_MIN> {
    fn name(&self) -> &'static str {
        Self::name_()
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display_unary(f, Self::name_(), self.mode, &*self.args[0])
    }
}

impl<const IS_MIN: bool> Function for MinMax<IS_MIN> {
    fn arguments(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.args
    }

    fn return_type(&self) -> LogicalType {
        self.args[0].output_type()
    }
}

impl<const IS_MIN: bool> AggregationFunction for MinMax<IS_MIN> {
    fn kind(&self) -> AggregationKind {
        if IS_MIN {
            AggregationKind::Min
        } else {
            AggregationKind::Max
        }
    }

    fn mode(&self) -> AggregationMode {
        self.mode
    }

    fn intermediate_type(&self) -> LogicalType {
        self.args[0].output_type()
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
        pool: &MemPool,
    ) -> Result<()> {
        match args[0] {
            Some(value) => unsafe { self.update_scalar(tuple, slot, value, pool) },
            None => Ok(()),
        }
    }

    /// Min/Max of the partial min/max is the min/max
    #[inline]
    unsafe fn merge(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        partial: Option<ScalarRef<'_>>,
        pool: &MemPool,
    ) -> Result<()> {
        match partial {
            Some(value) => unsafe { self.update_scalar(tuple, slot, value, pool) },
            None => Ok(()),
        }
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
    use crate::exec::physical_expr::function::aggregate::AggregationError;
    use tuple_block::scalar::ScalarImpl;

    #[test]
    fn test_min_max_native() {
        let arg: Arc<dyn PhysicalExpr> = Arc::new(FieldRef::new(0, LogicalType::Double));
        let min = Min::try_new(Arc::clone(&arg), AggregationMode::Update).unwrap();
        let max = Max::try_new(arg, AggregationMode::Update).unwrap();
        let min_state = TestTuple::new(&min);
        let max_state = TestTuple::new(&max);
        for value in [Some(3.0), None, Some(-1.5), Some(7.25)] {
            let args = [value.map(ScalarRef::Float64)];
            min_state.update(&min, &args);
            max_state.update(&max, &args);
        }
        assert_eq!(min_state.finalize(&min), Some(ScalarImpl::Float64(-1.5)));
        assert_eq!(max_state.finalize(&max), Some(ScalarImpl::Float64(7.25)));
    }

    #[test]
    fn test_min_max_var_len_copies_into_pool() {
        let min = Min::try_new(
            Arc::new(FieldRef::new(0, LogicalType::VarChar)),
            AggregationMode::Update,
        )
        .unwrap();
        let state = TestTuple::new(&min);
        {
            let owned = ["curry", "banana", "cherry"].map(String::from);
            for value in &owned {
                state.update(&min, &[Some(ScalarRef::String(value))]);
            }
        }
        // The owned strings are dropped, the slot references the pool
        assert_eq!(state.value(), Some(ScalarRef::String("banana")));
    }

    #[test]
    fn test_merge_max_boolean() {
        let max = Max::try_new(
            Arc::new(FieldRef::new(0, LogicalType::Boolean)),
            AggregationMode::Merge,
        )
        .unwrap();
        let state = TestTuple::new(&max);
        state.merge(&max, Some(ScalarRef::Boolean(false)));
        state.merge(&max, None);
        state.merge(&max, Some(ScalarRef::Boolean(true)));
        state.merge(&max, Some(ScalarRef::Boolean(false)));
        assert_eq!(state.value(), Some(ScalarRef::Boolean(true)));
    }

    #[test]
    fn test_unexpected_input() {
        let min = Min::try_new(
            Arc::new(FieldRef::new(0, LogicalType::Integer)),
            AggregationMode::Update,
        )
        .unwrap();
        let state = TestTuple::new(&min);
        let err = unsafe {
            min.update(
                state.tuple,
                state.slot(),
                &[Some(ScalarRef::Int64(1))],
                &state.pool,
            )
        }
        .unwrap_err();
        assert!(matches!(err, AggregationError::UnexpectedInput { .. }));
    }
}
