//! Average of the numeric input
//!
//! The intermediate value is a `VarBinary` slot that references 16 bytes in the pool:
//! the little endian `f64` sum followed by the little endian `i64` count. The bytes
//! are updated in place, serializing the state is a no-op and the previous stage's
//! output can be merged directly.

use std::sync::Arc;

use num_traits::AsPrimitive;
use snafu::{ensure, ResultExt};
use tuple_block::pool::MemPool;
use tuple_block::scalar::{NativeType, ScalarRef};
use tuple_block::tuple::{SlotDescriptor, TuplePtr};
use tuple_block::types::LogicalType;

use super::{
    display_unary, unexpected_input, AggregationError, AggregationFunction, AggregationKind,
    AggregationMode, AllocateSnafu, ArgTypeMismatchSnafu, Result, Stringify,
};
use crate::exec::physical_expr::function::Function;
use crate::exec::physical_expr::PhysicalExpr;

const STATE_SIZE: usize = 16;

/// Running sum and count of the average
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct AvgState {
    pub(crate) sum: f64,
    pub(crate) count: i64,
}

impl AvgState {
    /// Decode the state, returns `None` if the length of the bytes is not 16
    #[inline]
    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; STATE_SIZE] = bytes.try_into().ok()?;
        let (sum, count) = bytes.split_at(8);
        Some(Self {
            sum: f64::from_le_bytes(sum.try_into().ok()?),
            count: i64::from_le_bytes(count.try_into().ok()?),
        })
    }

    #[inline]
    fn encode_into(self, bytes: &mut [u8]) {
        bytes[..8].copy_from_slice(&self.sum.to_le_bytes());
        bytes[8..STATE_SIZE].copy_from_slice(&self.count.to_le_bytes());
    }

    /// Average of the state, `None` if no value is accumulated
    #[inline]
    pub(crate) fn average(self) -> Option<f64> {
        (self.count != 0).then(|| self.sum / self.count as f64)
    }
}

/// Add the sum and count into the state stored in the slot
///
/// # Safety
///
/// The slot is a live `VarBinary` slot initialized by [`Avg`], its bytes are owned by a
/// pool that outlives the tuple
#[inline]
pub(crate) unsafe fn accumulate(tuple: TuplePtr, slot: &SlotDescriptor, sum: f64, count: i64) {
    let bytes = unsafe { tuple.var_len_mut(slot) };
    debug_assert_eq!(bytes.len(), STATE_SIZE);
    let mut state = AvgState::decode(bytes).unwrap_or_default();
    state.sum += sum;
    state.count = state.count.wrapping_add(count);
    state.encode_into(bytes);
}

/// Cast the input to `f64` and accumulate it as a single value
///
/// # Safety
///
/// See [`accumulate`]
#[inline]
pub(crate) unsafe fn accumulate_as<I>(tuple: TuplePtr, slot: &SlotDescriptor, value: I)
where
    I: NativeType + AsPrimitive<f64>,
{
    unsafe { accumulate(tuple, slot, value.as_(), 1) }
}

/// Aggregation function that computes the average of the numeric input
#[derive(Debug)]
pub struct Avg {
    args: Vec<Arc<dyn PhysicalExpr>>,
    mode: AggregationMode,
}

impl Avg {
    /// Create a new avg function. In merge mode, the arg is the serialized state
    /// produced by the previous stage
    pub fn try_new(arg: Arc<dyn PhysicalExpr>, mode: AggregationMode) -> Result<Self> {
        let arg_type = arg.output_type();
        let accepted = match mode {
            AggregationMode::Update => arg_type.is_numeric(),
            AggregationMode::Merge => arg_type == LogicalType::VarBinary,
        };
        ensure!(
            accepted,
            ArgTypeMismatchSnafu {
                func: "Avg",
                mode,
                arg_type
            }
        );
        Ok(Self {
            args: vec![arg],
            mode,
        })
    }
}

impl Stringify for Avg {
    fn name(&self) -> &'static str {
        "Avg"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display_unary(f, "Avg", self.mode, &*self.args[0])
    }
}

impl Function for Avg {
    fn arguments(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.args
    }

    fn return_type(&self) -> LogicalType {
        LogicalType::Double
    }
}

impl AggregationFunction for Avg {
    fn kind(&self) -> AggregationKind {
        AggregationKind::Avg
    }

    fn mode(&self) -> AggregationMode {
        self.mode
    }

    fn intermediate_type(&self) -> LogicalType {
        LogicalType::VarBinary
    }

    unsafe fn init(&self, tuple: TuplePtr, slot: &SlotDescriptor, pool: &MemPool) -> Result<()> {
        unsafe {
            tuple
                .set(slot, Some(ScalarRef::Binary(&[0; STATE_SIZE])), pool)
                .context(AllocateSnafu { func: "Avg" })
        }
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
            match value {
                ScalarRef::Int8(v) => accumulate_as(tuple, slot, v),
                ScalarRef::Int16(v) => accumulate_as(tuple, slot, v),
                ScalarRef::Int32(v) => accumulate_as(tuple, slot, v),
                ScalarRef::Int64(v) => accumulate_as(tuple, slot, v),
                ScalarRef::Float32(v) => accumulate_as(tuple, slot, v),
                ScalarRef::Float64(v) => accumulate_as(tuple, slot, v),
                value => return Err(unexpected_input(self.name(), value)),
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
        let bytes = match partial {
            None => return Ok(()),
            Some(ScalarRef::Binary(bytes)) => bytes,
            Some(partial) => return Err(unexpected_input(self.name(), partial)),
        };
        let partial = AvgState::decode(bytes).ok_or(AggregationError::MalformedPartialState {
            func: "Avg",
            len: bytes.len(),
        })?;
        unsafe { accumulate(tuple, slot, partial.sum, partial.count) };
        Ok(())
    }

    unsafe fn finalize(
        &self,
        src: TuplePtr,
        src_slot: &SlotDescriptor,
        dst: TuplePtr,
        dst_slot: &SlotDescriptor,
        _pool: &MemPool,
    ) -> Result<()> {
        let average = match unsafe { src.get(src_slot) } {
            Some(ScalarRef::Binary(bytes)) => AvgState::decode(bytes).and_then(AvgState::average),
            _ => None,
        };
        unsafe {
            match average {
                Some(average) => dst.write_native(dst_slot, average),
                None => dst.set_null(dst_slot),
            }
        }
        Ok(())
    }
}
