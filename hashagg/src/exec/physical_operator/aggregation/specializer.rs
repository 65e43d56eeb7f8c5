//! Specialize the update of the intermediate tuple
//!
//! The interpreted update evaluates the arguments into scalars and dispatches on the
//! scalar for every row and every function. When all of the functions read their
//! argument directly from a slot of the input row, the dispatch can be resolved once in
//! `prepare`: each function becomes a kernel that reads the native value from the input
//! slot and writes the state slot. The kernels share the typed helpers with the
//! aggregation functions, the specialized update produces the same bits as the
//! interpreted update.

use std::fmt::Debug;

use num_traits::AsPrimitive;
use snafu::Snafu;
use tuple_block::scalar::NativeType;
use tuple_block::tuple::{SlotDescriptor, TupleDescriptor, TuplePtr};
use tuple_block::types::PhysicalType;

use crate::exec::physical_expr::field_ref::FieldRef;
use crate::exec::physical_expr::function::aggregate::sum::SumType;
use crate::exec::physical_expr::function::aggregate::{
    any_value, avg, count, min_max, sum, AggregationFunction, AggregationFunctionList,
    AggregationKind, AggregationMode,
};
use crate::exec::physical_expr::PhysicalExpr;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum SpecializeError {
    #[snafu(display("Can not specialize the `{func}` aggregation function: {reason}"))]
    Unsupported { func: String, reason: &'static str },
}

type Result<T> = std::result::Result<T, SpecializeError>;

/// Everything the specializer needs to know to compile the update
#[derive(Debug, Clone, Copy)]
pub struct SpecializationRequest<'a> {
    /// Descriptor of the rows produced by the child of the aggregation
    pub input_descriptor: &'a TupleDescriptor,
    /// Functions to update, with the slots of their states in the intermediate tuple
    pub funcs: &'a AggregationFunctionList,
}

/// Specializer compiles the update of the intermediate tuple for the given input.
///
/// Returning an error is not fatal: the aggregation falls back to the interpreted
/// update
pub trait Specializer: Send + Sync + Debug {
    /// Name of the specializer
    fn name(&self) -> &'static str;

    /// Compile the update
    fn specialize(&self, request: &SpecializationRequest<'_>) -> Result<CompiledUpdateTuple>;
}

/// Kernel updates the state slot of the intermediate tuple with the input row
type KernelFn = unsafe fn(kernel: &Kernel, dst: TuplePtr, row: TuplePtr);

/// Specialized update of a single aggregation function
#[derive(Debug)]
struct Kernel {
    /// Name of the function, for debugging
    name: &'static str,
    /// Slot in the input row. `count(*)` does not have input
    input: Option<SlotDescriptor>,
    /// Slot in the intermediate tuple
    state: SlotDescriptor,
    func: KernelFn,
}

/// Update of the intermediate tuple produced by the [`Specializer`]
#[derive(Debug)]
pub struct CompiledUpdateTuple {
    kernels: Vec<Kernel>,
}

impl CompiledUpdateTuple {
    /// Number of the kernels, one for each aggregation function
    pub fn num_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Update the intermediate tuple with the input row
    ///
    /// # Safety
    ///
    /// - `dst` is a live intermediate tuple allocated with the descriptor in the request
    ///
    /// - `row` is a live row allocated with the input descriptor in the request
    #[inline]
    pub(super) unsafe fn update(&self, dst: TuplePtr, row: TuplePtr) {
        self.kernels
            .iter()
            .for_each(|kernel| unsafe { (kernel.func)(kernel, dst, row) });
    }
}

/// Input slot of the kernel. Only `count(*)` is compiled without input, its kernel
/// never calls this function
#[inline(always)]
fn input_slot(kernel: &Kernel) -> &SlotDescriptor {
    debug_assert!(kernel.input.is_some(), "`{}` kernel has no input", kernel.name);
    kernel.input.as_ref().unwrap_or(&kernel.state)
}

unsafe fn count_star_kernel(kernel: &Kernel, dst: TuplePtr, _row: TuplePtr) {
    unsafe { count::increment(dst, &kernel.state, 1) }
}

unsafe fn count_kernel(kernel: &Kernel, dst: TuplePtr, row: TuplePtr) {
    unsafe {
        if !row.is_null(input_slot(kernel)) {
            count::increment(dst, &kernel.state, 1);
        }
    }
}

unsafe fn sum_kernel<I, S>(kernel: &Kernel, dst: TuplePtr, row: TuplePtr)
where
    I: NativeType + AsPrimitive<S>,
    S: SumType,
{
    let input = input_slot(kernel);
    unsafe {
        if !row.is_null(input) {
            sum::accumulate_as::<I, S>(dst, &kernel.state, row.read_native::<I>(input));
        }
    }
}

unsafe fn min_max_kernel<T: NativeType, const IS_MIN: bool>(
    kernel: &Kernel,
    dst: TuplePtr,
    row: TuplePtr,
) {
    let input = input_slot(kernel);
    unsafe {
        if !row.is_null(input) {
            min_max::update_native::<T, IS_MIN>(dst, &kernel.state, row.read_native::<T>(input));
        }
    }
}

unsafe fn avg_kernel<I>(kernel: &Kernel, dst: TuplePtr, row: TuplePtr)
where
    I: NativeType + AsPrimitive<f64>,
{
    let input = input_slot(kernel);
    unsafe {
        if !row.is_null(input) {
            avg::accumulate_as::<I>(dst, &kernel.state, row.read_native::<I>(input));
        }
    }
}

unsafe fn any_value_kernel<T: NativeType>(kernel: &Kernel, dst: TuplePtr, row: TuplePtr) {
    let input = input_slot(kernel);
    unsafe {
        if !row.is_null(input) {
            any_value::update_native::<T>(dst, &kernel.state, row.read_native::<T>(input));
        }
    }
}

fn sum_kernel_fn(physical_type: PhysicalType) -> Option<KernelFn> {
    let kernel: KernelFn = match physical_type {
        PhysicalType::Int8 => sum_kernel::<i8, i64>,
        PhysicalType::Int16 => sum_kernel::<i16, i64>,
        PhysicalType::Int32 => sum_kernel::<i32, i64>,
        PhysicalType::Int64 => sum_kernel::<i64, i64>,
        PhysicalType::Float32 => sum_kernel::<f32, f64>,
        PhysicalType::Float64 => sum_kernel::<f64, f64>,
        _ => return None,
    };
    Some(kernel)
}

fn avg_kernel_fn(physical_type: PhysicalType) -> Option<KernelFn> {
    macro_rules! select {
        ($({$variant:ident, $ty:ty, $physical:ident}),*) => {
            match physical_type {
                $(PhysicalType::$physical => Some(avg_kernel::<$ty> as KernelFn),)*
                _ => None,
            }
        };
    }
    tuple_block::for_all_native_types!(select)
}

fn min_max_kernel_fn<const IS_MIN: bool>(physical_type: PhysicalType) -> Option<KernelFn> {
    macro_rules! select {
        ($({$variant:ident, $ty:ty, $physical:ident}),*) => {
            match physical_type {
                $(PhysicalType::$physical => Some(min_max_kernel::<$ty, IS_MIN> as KernelFn),)*
                _ => None,
            }
        };
    }
    tuple_block::for_all_native_types!(select)
}

fn any_value_kernel_fn(physical_type: PhysicalType) -> Option<KernelFn> {
    macro_rules! select {
        ($({$variant:ident, $ty:ty, $physical:ident}),*) => {
            match physical_type {
                $(PhysicalType::$physical => Some(any_value_kernel::<$ty> as KernelFn),)*
                _ => None,
            }
        };
    }
    tuple_block::for_all_native_types!(select)
}

/// Specializer that selects the monomorphized kernels. It supports the functions in
/// [`AggregationMode::Update`] whose argument is a [`FieldRef`] to a slot with native
/// type
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelSpecializer;

impl KernelSpecializer {
    fn compile_kernel(
        func: &dyn AggregationFunction,
        state: &SlotDescriptor,
        input_descriptor: &TupleDescriptor,
    ) -> Result<Kernel> {
        let unsupported = |reason: &'static str| SpecializeError::Unsupported {
            func: func.to_string(),
            reason,
        };

        if func.mode() != AggregationMode::Update {
            return Err(unsupported("only the update mode is specialized"));
        }

        if func.kind() == AggregationKind::CountStar {
            return Ok(Kernel {
                name: func.name(),
                input: None,
                state: state.clone(),
                func: count_star_kernel,
            });
        }

        let [arg] = func.arguments() else {
            return Err(unsupported("expect exactly one argument"));
        };
        let Some(field_ref) = arg.as_any().downcast_ref::<FieldRef>() else {
            return Err(unsupported("argument is not a field reference"));
        };
        let Some(input) = input_descriptor.slots().get(field_ref.field_index()) else {
            return Err(unsupported("field reference is out of range"));
        };
        if input.logical_type() != field_ref.output_type() {
            return Err(unsupported(
                "field reference does not match the type of the input",
            ));
        }

        let physical_type = input.physical_type();
        let kernel = match func.kind() {
            AggregationKind::CountStar => None,
            AggregationKind::Count => Some(count_kernel as KernelFn),
            AggregationKind::Sum => sum_kernel_fn(physical_type),
            AggregationKind::Min => min_max_kernel_fn::<true>(physical_type),
            AggregationKind::Max => min_max_kernel_fn::<false>(physical_type),
            AggregationKind::Avg => avg_kernel_fn(physical_type),
            AggregationKind::AnyValue => any_value_kernel_fn(physical_type),
        };
        let Some(kernel) = kernel else {
            return Err(unsupported("argument does not have a native type"));
        };

        Ok(Kernel {
            name: func.name(),
            input: Some(input.clone()),
            state: state.clone(),
            func: kernel,
        })
    }
}

impl Specializer for KernelSpecializer {
    fn name(&self) -> &'static str {
        "KernelSpecializer"
    }

    fn specialize(&self, request: &SpecializationRequest<'_>) -> Result<CompiledUpdateTuple> {
        let kernels = request
            .funcs
            .funcs()
            .iter()
            .zip(request.funcs.slots())
            .map(|(func, state)| {
                Self::compile_kernel(&**func, state, request.input_descriptor)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CompiledUpdateTuple { kernels })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::physical_expr::arith::{Arith, ArithOperator};
    use crate::exec::physical_expr::function::aggregate::avg::Avg;
    use crate::exec::physical_expr::function::aggregate::count::{Count, CountStar};
    use crate::exec::physical_expr::function::aggregate::min_max::{Max, Min};
    use crate::exec::physical_expr::function::aggregate::sum::Sum;
    use tuple_block::batch::RowBatch;
    use tuple_block::pool::MemPool;
    use tuple_block::scalar::ScalarRef;
    use tuple_block::tuple::TupleRef;
    use tuple_block::types::LogicalType;

    fn field(index: usize, logical_type: LogicalType) -> Arc<dyn PhysicalExpr> {
        Arc::new(FieldRef::new(index, logical_type))
    }

    fn func_list(
        funcs: Vec<Arc<dyn AggregationFunction>>,
    ) -> (TupleDescriptor, AggregationFunctionList) {
        let descriptor =
            TupleDescriptor::new(funcs.iter().map(|func| func.intermediate_type()));
        let slots = descriptor.slots().to_vec();
        (descriptor, AggregationFunctionList::new(funcs, slots))
    }

    #[test]
    fn test_specialized_update_matches_interpreted_update() {
        let input_descriptor = Arc::new(TupleDescriptor::new([
            LogicalType::Float,
            LogicalType::Integer,
        ]));
        let (descriptor, funcs) = func_list(vec![
            Arc::new(CountStar::new()),
            Arc::new(
                Count::try_new(field(1, LogicalType::Integer), AggregationMode::Update)
                    .unwrap(),
            ),
            Arc::new(Sum::try_new(field(0, LogicalType::Float), AggregationMode::Update).unwrap()),
            Arc::new(
                Sum::try_new(field(1, LogicalType::Integer), AggregationMode::Update)
                    .unwrap(),
            ),
            Arc::new(Min::try_new(field(0, LogicalType::Float), AggregationMode::Update).unwrap()),
            Arc::new(
                Max::try_new(field(1, LogicalType::Integer), AggregationMode::Update)
                    .unwrap(),
            ),
            Arc::new(Avg::try_new(field(0, LogicalType::Float), AggregationMode::Update).unwrap()),
        ]);
        let compiled = KernelSpecializer
            .specialize(&SpecializationRequest {
                input_descriptor: &input_descriptor,
                funcs: &funcs,
            })
            .unwrap();
        assert_eq!(compiled.num_kernels(), 7);

        let mut batch = RowBatch::new(Arc::clone(&input_descriptor), 4);
        for (lhs, rhs) in [
            (Some(0.1_f32), Some(i32::MAX)),
            (None, Some(3)),
            (Some(f32::NAN), None),
            (Some(-7.25), Some(-4)),
        ] {
            batch
                .push_row(&[lhs.map(ScalarRef::Float32), rhs.map(ScalarRef::Int32)])
                .unwrap();
        }

        let pool = MemPool::new();
        let interpreted = pool.allocate_tuple(&descriptor).unwrap();
        let specialized = pool.allocate_tuple(&descriptor).unwrap();
        let mut args = Vec::new();
        unsafe {
            funcs.init_states(interpreted, &pool).unwrap();
            funcs.init_states(specialized, &pool).unwrap();
            for row in batch.rows() {
                args.clear();
                funcs.evaluate_args(row, &mut args).unwrap();
                funcs.update_states(interpreted, &args, &pool).unwrap();
                compiled.update(specialized, row.ptr());
            }
        }

        let interpreted = unsafe { TupleRef::new(interpreted, &descriptor) };
        let specialized = unsafe { TupleRef::new(specialized, &descriptor) };
        // Compare the bits, NaN is not equal to itself
        assert_eq!(format!("{:?}", interpreted), format!("{:?}", specialized));
        assert_eq!(specialized.get(0), Some(ScalarRef::Int64(4)));
        assert_eq!(specialized.get(1), Some(ScalarRef::Int64(3)));
        assert_eq!(
            specialized.get(3),
            Some(ScalarRef::Int64(i64::from(i32::MAX) - 1))
        );
        assert_eq!(specialized.get(5), Some(ScalarRef::Int32(i32::MAX)));
    }

    #[test]
    fn test_unsupported() {
        let input_descriptor = TupleDescriptor::new([LogicalType::VarChar, LogicalType::BigInt]);
        let specialize = |func: Arc<dyn AggregationFunction>| {
            let (_, funcs) = func_list(vec![func]);
            KernelSpecializer
                .specialize(&SpecializationRequest {
                    input_descriptor: &input_descriptor,
                    funcs: &funcs,
                })
                .unwrap_err()
                .to_string()
        };

        assert_eq!(
            specialize(Arc::new(
                Min::try_new(field(0, LogicalType::VarChar), AggregationMode::Update).unwrap()
            )),
            "Can not specialize the `Min(#0)` aggregation function: argument does not have a native type"
        );
        assert_eq!(
            specialize(Arc::new(
                Sum::try_new(field(1, LogicalType::BigInt), AggregationMode::Merge).unwrap()
            )),
            "Can not specialize the `MergeSum(#1)` aggregation function: only the update mode is specialized"
        );
        let negate = Arith::try_new(
            field(1, LogicalType::BigInt),
            ArithOperator::Sub,
            field(1, LogicalType::BigInt),
        )
        .unwrap();
        assert!(specialize(Arc::new(
            Sum::try_new(Arc::new(negate), AggregationMode::Update).unwrap()
        ))
        .ends_with("argument is not a field reference"));
        assert!(specialize(Arc::new(
            Sum::try_new(field(2, LogicalType::BigInt), AggregationMode::Update).unwrap()
        ))
        .ends_with("field reference is out of range"));
    }
}
