//! Count function

use std::sync::Arc;

use snafu::ensure;
use tuple_block::pool::MemPool;
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::{SlotDescriptor, TuplePtr};
use tuple_block::types::LogicalType;

use super::{
    display_unary, finalize_by_copy, unexpected_input, AggregationFunction, AggregationKind,
    AggregationMode, ArgTypeMismatchSnafu, Result, Stringify,
};
use crate::exec::physical_expr::function::Function;
use crate::exec::physical_expr::PhysicalExpr;

/// Count(*) function
pub type CountStar = Count<true>;

/// Add `n` to the count stored in the slot
///
/// # Safety
///
/// The slot is a `BigInt` slot of the live tuple
#[inline]
pub(crate) unsafe fn increment(tuple: TuplePtr, slot: &SlotDescriptor, n: i64) {
    unsafe {
        let count = tuple.read_native::<i64>(slot);
        tuple.write_native(slot, count.wrapping_add(n));
    }
}

/// Aggregation function that count the number of rows
///
/// If the `STAR` generic is true, the count will take `NULL` into consideration, it
/// counts all of the rows
#[derive(Debug)]
pub struct Count<const STAR: bool> {
    args: Vec<Arc<dyn PhysicalExpr>>,
    mode: AggregationMode,
}

impl CountStar {
    /// Create a new `count(*)` function
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            mode: AggregationMode::Update,
        }
    }
}

impl Default for CountStar {
    fn default() -> Self {
        Self::new()
    }
}

impl Count<false> {
    /// Create a new `count(expr)` function. In merge mode, the arg is the count produced
    /// by the previous stage, it can be the output of `count(*)` or `count(expr)`
    pub fn try_new(arg: Arc<dyn PhysicalExpr>, mode: AggregationMode) -> Result<Self> {
        if mode == AggregationMode::Merge {
            ensure!(
                arg.output_type() == LogicalType::BigInt,
                ArgTypeMismatchSnafu {
                    func: "Count",
                    mode,
                    arg_type: arg.output_type()
                }
            );
        }
        Ok(Self {
            args: vec![arg],
            mode,
        })
    }
}

impl<const STAR: bool> Stringify for Count<STAR> {
    #[inline]
    fn name(&self) -> &'static str {
        if STAR { "CountStar" } else { "Count" }
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if STAR {
            write!(f, "CountStar")
        } else {
            display_unary(f, "Count", self.mode, &*self.args[0])
        }
    }
}

impl<const STAR: bool> Function for Count<STAR> {
    fn arguments(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.args
    }

    fn return_type(&self) -> LogicalType {
        LogicalType::BigInt
    }
}

impl<const STAR: bool> AggregationFunction for Count<STAR> {
    fn kind(&self) -> AggregationKind {
        if STAR {
            AggregationKind::CountStar
        } else {
            AggregationKind::Count
        }
    }

    fn mode(&self) -> AggregationMode {
        self.mode
    }

    fn intermediate_type(&self) -> LogicalType {
        LogicalType::BigInt
    }

    unsafe fn init(&self, tuple: TuplePtr, slot: &SlotDescriptor, _pool: &MemPool) -> Result<()> {
        unsafe { tuple.write_native(slot, 0_i64) };
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
        if STAR || args[0].is_some() {
            unsafe { increment(tuple, slot, 1) };
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
        match partial {
            Some(ScalarRef::Int64(count)) => unsafe { increment(tuple, slot, count) },
            None => (),
            Some(partial) => return Err(unexpected_input(self.name(), partial)),
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
