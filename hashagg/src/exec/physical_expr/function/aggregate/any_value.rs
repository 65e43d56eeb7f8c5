//! AnyValue function, returns an arbitrary non-null value of the group
//!
//! Inside one instance the first non-null value wins, it is deterministic for a given
//! input order. Which value wins when partial results are merged depends on the order
//! the partial results arrive

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

/// Keep the value if the slot is still `NULL`
///
/// # Safety
///
/// The slot is a live slot with physical type `T::PHYSICAL_TYPE`
#[inline]
pub(crate) unsafe fn update_native<T: NativeType>(
    tuple: TuplePtr,
    slot: &SlotDescriptor,
    value: T,
) {
    unsafe {
        if tuple.is_null(slot) {
            tuple.write_native(slot, value);
        }
    }
}

/// Aggregation function that returns the first non-null value it sees
#[derive(Debug)]
pub struct AnyValue {
    args: Vec<Arc<dyn PhysicalExpr>>,
    mode: AggregationMode,
}

impl AnyValue {
    /// Create a new any_value function
    pub fn try_new(arg: Arc<dyn PhysicalExpr>, mode: AggregationMode) -> Result<Self> {
        Ok(Self {
            args: vec![arg],
            mode,
        })
    }

    #[inline]
    unsafe fn update_scalar(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        value: ScalarRef<'_>,
        pool: &MemPool,
    ) -> Result<()> {
        if value.physical_type() != slot.physical_type() {
            return Err(unexpected_input(self.name(), value));
        }
        unsafe {
            if tuple.is_null(slot) {
                tuple
                    .set(slot, Some(value), pool)
                    .context(AllocateSnafu { func: self.name() })?;
            }
        }
        Ok(())
    }
}

impl Stringify for AnyValue {
    fn name(&self) -> &'static str {
        "AnyValue"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display_unary(f, "AnyValue", self.mode, &*self.args[0])
    }
}

impl Function for AnyValue {
    fn arguments(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.args
    }

    fn return_type(&self) -> LogicalType {
        self.args[0].output_type()
    }
}

impl AggregationFunction for AnyValue {
    fn kind(&self) -> AggregationKind {
        AggregationKind::AnyValue
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
    use tuple_block::scalar::ScalarImpl;

    #[test]
    fn test_first_non_null_wins() {
        let func = AnyValue::try_new(
            Arc::new(FieldRef::new(0, LogicalType::VarBinary)),
            AggregationMode::Update,
        )
        .unwrap();
        let state = TestTuple::new(&func);
        state.update(&func, &[None]);
        state.update(&func, &[Some(ScalarRef::Binary(b"first"))]);
        state.update(&func, &[Some(ScalarRef::Binary(b"second"))]);
        assert_eq!(
            state.finalize(&func),
            Some(ScalarImpl::Binary(b"first".to_vec()))
        );
    }
}
