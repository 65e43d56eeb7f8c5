//! Aggregate functions
//!
//! The aggregate functions do not own their states. The state of each function is a
//! slot in the intermediate tuple, the aggregation operator allocates the tuple in its
//! pool and asks the functions to init/update/merge/finalize the slot.
//!
//! Each function runs in one of the [`AggregationMode`]s:
//!
//! - [`AggregationMode::Update`]: the argument is the raw input of the function
//!
//! - [`AggregationMode::Merge`]: the argument is the intermediate value of the same
//!   function produced by a previous aggregation stage that serializes its output. The
//!   function combines it into its own intermediate value
//!
//! Functions in both modes share the intermediate type and the return type, such that
//! the stage that merges can finalize its output exactly like the single stage
//! aggregation.

pub mod any_value;
pub mod avg;
pub mod count;
pub mod min_max;
pub mod sum;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tuple_block::pool::{MemPool, PoolError};
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::{SlotDescriptor, TuplePtr, TupleRef};
use tuple_block::types::LogicalType;

use super::Function;
use crate::exec::physical_expr::{ExprResult, PhysicalExpr};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum AggregationError {
    #[snafu(display(
        "`{func}` aggregation function in `{mode:?}` mode does not accept argument with logical type `{arg_type}`"
    ))]
    ArgTypeMismatch {
        func: &'static str,
        mode: AggregationMode,
        arg_type: LogicalType,
    },
    #[snafu(display(
        "`{func}` aggregation function received `{input}`, it does not match the signature of the function"
    ))]
    UnexpectedInput { func: &'static str, input: String },
    #[snafu(display(
        "`{func}` aggregation function received a partial state with `{len}` bytes, which is malformed"
    ))]
    MalformedPartialState { func: &'static str, len: usize },
    #[snafu(display("`{func}` aggregation function failed to allocate memory for its state"))]
    Allocate {
        func: &'static str,
        source: PoolError,
    },
}

/// Aggregation result
pub type Result<T> = std::result::Result<T, AggregationError>;

#[cold]
pub(super) fn unexpected_input(func: &'static str, input: ScalarRef<'_>) -> AggregationError {
    AggregationError::UnexpectedInput {
        func,
        input: format!("{:?}", input),
    }
}

/// Mode of the aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationMode {
    /// Consume the raw input
    Update,
    /// Consume the intermediate value produced by a previous stage
    Merge,
}

/// Kinds of the aggregation function. The set is closed, the specializer relies on it
/// to choose the specialized kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    /// `count(*)`
    CountStar,
    /// `count(expr)`
    Count,
    /// `sum(expr)`
    Sum,
    /// `min(expr)`
    Min,
    /// `max(expr)`
    Max,
    /// `avg(expr)`
    Avg,
    /// `any_value(expr)`
    AnyValue,
}

/// Stringify the aggregation function
pub trait Stringify {
    /// Get name of the aggregation function
    fn name(&self) -> &'static str;

    /// Debug message
    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;

    /// Display message, in the form `Name(arg)`
    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
}

/// Trait for all of the aggregation functions
///
/// All of the methods that touch the tuple are unsafe, the caller should guarantee:
///
/// - `tuple` is alive, allocated with the descriptor that contains the `slot`
///
/// - the logical type of the `slot` is [`intermediate_type`](Self::intermediate_type)
///
/// - the `pool` outlives the tuple, variable length values written by the function are
///   allocated in it
pub trait AggregationFunction: Function + Stringify {
    /// Kind of the function
    fn kind(&self) -> AggregationKind;

    /// Mode of the function
    fn mode(&self) -> AggregationMode;

    /// Logical type of the slot that stores the intermediate value. It is also the type
    /// of the serialized output and the argument type in [`AggregationMode::Merge`]
    fn intermediate_type(&self) -> LogicalType;

    /// Initialize the slot with the initial value of the function
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]
    unsafe fn init(&self, tuple: TuplePtr, slot: &SlotDescriptor, pool: &MemPool) -> Result<()>;

    /// Update the intermediate value with the raw input. `args` has exactly
    /// `self.arguments().len()` values
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]
    unsafe fn update(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        args: &[Option<ScalarRef<'_>>],
        pool: &MemPool,
    ) -> Result<()>;

    /// Combine the intermediate value produced by another instance into the intermediate
    /// value in the slot
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]
    unsafe fn merge(
        &self,
        tuple: TuplePtr,
        slot: &SlotDescriptor,
        partial: Option<ScalarRef<'_>>,
        pool: &MemPool,
    ) -> Result<()>;

    /// Convert the intermediate value into its serialized form, in place. The value in
    /// the slot after serialization can be consumed by the same function in
    /// [`AggregationMode::Merge`]. Intermediate values of the functions here are already
    /// in the serialized form, therefore it does nothing by default
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]
    unsafe fn serialize(
        &self,
        _tuple: TuplePtr,
        _slot: &SlotDescriptor,
        _pool: &MemPool,
    ) -> Result<()> {
        Ok(())
    }

    /// Write the final value of the intermediate value in `src_slot` of `src` into the
    /// `dst_slot` of `dst`. The logical type of the `dst_slot` is the
    /// [`return_type`](Function::return_type). `src` and `dst` may be the same tuple
    /// when the return type equals to the intermediate type
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]. In addition, `pool` must outlive `dst`
    unsafe fn finalize(
        &self,
        src: TuplePtr,
        src_slot: &SlotDescriptor,
        dst: TuplePtr,
        dst_slot: &SlotDescriptor,
        pool: &MemPool,
    ) -> Result<()>;
}

impl Debug for dyn AggregationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.debug(f)
    }
}

impl Display for dyn AggregationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

/// Display the argument of the unary function, prefix the name with `Merge` in the
/// merge mode
pub(super) fn display_unary(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    mode: AggregationMode,
    arg: &dyn PhysicalExpr,
) -> std::fmt::Result {
    if mode == AggregationMode::Merge {
        write!(f, "Merge")?;
    }
    write!(f, "{}(", name)?;
    arg.compact_display(f)?;
    write!(f, ")")
}

/// Copy the intermediate value to the output slot, the finalize of the functions whose
/// return type is the intermediate type
#[inline]
pub(super) unsafe fn finalize_by_copy(
    func: &'static str,
    src: TuplePtr,
    src_slot: &SlotDescriptor,
    dst: TuplePtr,
    dst_slot: &SlotDescriptor,
    pool: &MemPool,
) -> Result<()> {
    unsafe {
        src.copy_slot_to(src_slot, dst, dst_slot, pool)
            .context(AllocateSnafu { func })
    }
}

/// A self-contained list of aggregation functions with the slots that store their
/// intermediate values. It knows how to init, update and finalize all of the slots in
/// an intermediate tuple
#[derive(Debug)]
pub struct AggregationFunctionList {
    /// List of the aggregation functions
    funcs: Vec<Arc<dyn AggregationFunction>>,
    /// Slots in the intermediate tuple, one for each function
    slots: Vec<SlotDescriptor>,
    /// Total number of arguments
    num_args: usize,
}

impl AggregationFunctionList {
    /// Create a new list
    ///
    /// # Panics
    ///
    /// Panics if the slot types do not match the intermediate types of the functions
    pub(crate) fn new(
        funcs: Vec<Arc<dyn AggregationFunction>>,
        slots: Vec<SlotDescriptor>,
    ) -> Self {
        assert_eq!(funcs.len(), slots.len());
        funcs.iter().zip(&slots).for_each(|(func, slot)| {
            assert_eq!(func.intermediate_type(), slot.logical_type());
        });
        let num_args = funcs.iter().map(|func| func.arguments().len()).sum();
        Self {
            funcs,
            slots,
            num_args,
        }
    }

    /// Functions in the list
    #[inline]
    pub fn funcs(&self) -> &[Arc<dyn AggregationFunction>] {
        &self.funcs
    }

    /// Slots of the functions in the intermediate tuple
    #[inline]
    pub fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    /// Total number of arguments of the functions
    #[inline]
    pub fn num_args(&self) -> usize {
        self.num_args
    }

    /// Init all of the slots in the tuple
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]
    pub(crate) unsafe fn init_states(&self, tuple: TuplePtr, pool: &MemPool) -> Result<()> {
        self.funcs
            .iter()
            .zip(&self.slots)
            .try_for_each(|(func, slot)| unsafe { func.init(tuple, slot, pool) })
    }

    /// Evaluate the arguments of all of the functions against the row, append the results
    /// to `args`. Nothing is mutated if the evaluation fails
    pub(crate) fn evaluate_args<'a>(
        &'a self,
        row: TupleRef<'a>,
        args: &mut Vec<Option<ScalarRef<'a>>>,
    ) -> ExprResult<()> {
        self.funcs.iter().try_for_each(|func| {
            func.arguments().iter().try_for_each(|arg| {
                args.push(arg.evaluate(row)?);
                Ok(())
            })
        })
    }

    /// Update or merge all of the slots in the tuple with the evaluated arguments
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]. `args` is produced by
    /// [`evaluate_args`](Self::evaluate_args)
    pub(crate) unsafe fn update_states(
        &self,
        tuple: TuplePtr,
        args: &[Option<ScalarRef<'_>>],
        pool: &MemPool,
    ) -> Result<()> {
        debug_assert_eq!(args.len(), self.num_args);
        let mut arg_index = 0;
        self.funcs
            .iter()
            .zip(&self.slots)
            .try_for_each(|(func, slot)| {
                let old = arg_index;
                arg_index += func.arguments().len();
                let func_args = &args[old..arg_index];
                unsafe {
                    match func.mode() {
                        AggregationMode::Update => func.update(tuple, slot, func_args, pool),
                        AggregationMode::Merge => func.merge(tuple, slot, func_args[0], pool),
                    }
                }
            })
    }

    /// Serialize all of the slots in place
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction`]
    pub(crate) unsafe fn serialize_states(&self, tuple: TuplePtr, pool: &MemPool) -> Result<()> {
        self.funcs
            .iter()
            .zip(&self.slots)
            .try_for_each(|(func, slot)| unsafe { func.serialize(tuple, slot, pool) })
    }

    /// Finalize all of the slots of `src` into the `dst_slots` of `dst`
    ///
    /// # Safety
    ///
    /// See [`AggregationFunction::finalize`]
    pub(crate) unsafe fn finalize_states(
        &self,
        src: TuplePtr,
        dst: TuplePtr,
        dst_slots: &[SlotDescriptor],
        pool: &MemPool,
    ) -> Result<()> {
        debug_assert_eq!(dst_slots.len(), self.funcs.len());
        self.funcs
            .iter()
            .zip(&self.slots)
            .zip(dst_slots)
            .try_for_each(|((func, src_slot), dst_slot)| unsafe {
                func.finalize(src, src_slot, dst, dst_slot, pool)
            })
    }
}

impl Display for AggregationFunctionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        let mut iter = self.funcs.iter();
        if let Some(func) = iter.next() {
            func.display(f)?;
            iter.try_for_each(|func| {
                write!(f, ", ")?;
                func.display(f)
            })?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tuple_block::tuple::TupleDescriptor;

    /// A single intermediate tuple for testing the functions
    pub(crate) struct TestTuple {
        pub(crate) descriptor: TupleDescriptor,
        pub(crate) pool: MemPool,
        pub(crate) tuple: TuplePtr,
    }

    impl TestTuple {
        pub(crate) fn new(func: &dyn AggregationFunction) -> Self {
            let descriptor = TupleDescriptor::new([func.intermediate_type()]);
            let pool = MemPool::new();
            let tuple = pool.allocate_tuple(&descriptor).unwrap();
            unsafe { func.init(tuple, &descriptor.slots()[0], &pool).unwrap() };
            Self {
                descriptor,
                pool,
                tuple,
            }
        }

        pub(crate) fn slot(&self) -> &SlotDescriptor {
            &self.descriptor.slots()[0]
        }

        pub(crate) fn update(
            &self,
            func: &dyn AggregationFunction,
            args: &[Option<ScalarRef<'_>>],
        ) {
            unsafe { func.update(self.tuple, self.slot(), args, &self.pool).unwrap() }
        }

        pub(crate) fn merge(&self, func: &dyn AggregationFunction, partial: Option<ScalarRef<'_>>) {
            unsafe { func.merge(self.tuple, self.slot(), partial, &self.pool).unwrap() }
        }

        pub(crate) fn value(&self) -> Option<ScalarRef<'_>> {
            unsafe { self.tuple.get(self.slot()) }
        }

        /// Finalize into a new tuple with the return type of the function
        pub(crate) fn finalize(
            &self,
            func: &dyn AggregationFunction,
        ) -> Option<tuple_block::scalar::ScalarImpl> {
            let descriptor = TupleDescriptor::new([func.return_type()]);
            let pool = MemPool::new();
            let dst = pool.allocate_tuple(&descriptor).unwrap();
            unsafe {
                func.finalize(self.tuple, self.slot(), dst, &descriptor.slots()[0], &pool)
                    .unwrap();
                dst.get(&descriptor.slots()[0])
                    .map(|value| value.to_owned_scalar())
            }
        }
    }
}
