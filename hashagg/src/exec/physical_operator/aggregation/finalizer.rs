//! Convert the intermediate tuples into the output tuples

use snafu::{ResultExt, Snafu};
use tuple_block::pool::{MemPool, PoolError};
use tuple_block::tuple::{TupleDescriptor, TuplePtr};

use crate::exec::physical_expr::function::aggregate::{AggregationError, AggregationFunctionList};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum FinalizeError {
    #[snafu(display("Failed to finalize the aggregation states"))]
    Finalize { source: AggregationError },
    #[snafu(display("Failed to serialize the aggregation states"))]
    Serialize { source: AggregationError },
    #[snafu(display("Failed to allocate the output tuple"))]
    AllocateOutput { source: PoolError },
    #[snafu(display("Failed to copy the group by key into the output tuple"))]
    CopyKey { source: PoolError },
}

type Result<T> = std::result::Result<T, FinalizeError>;

/// Finalizer produces the output tuple of a group. With `needs_finalize`, the states
/// are replaced by the final values. Otherwise, the states are serialized such that the
/// next stage can merge them
#[derive(Debug, Clone, Copy)]
pub(super) struct Finalizer<'a> {
    funcs: &'a AggregationFunctionList,
    intermediate_descriptor: &'a TupleDescriptor,
    output_descriptor: &'a TupleDescriptor,
    num_keys: usize,
    needs_finalize: bool,
}

impl<'a> Finalizer<'a> {
    pub(super) fn new(
        funcs: &'a AggregationFunctionList,
        intermediate_descriptor: &'a TupleDescriptor,
        output_descriptor: &'a TupleDescriptor,
        needs_finalize: bool,
    ) -> Self {
        debug_assert_eq!(
            intermediate_descriptor.num_slots(),
            output_descriptor.num_slots()
        );
        Self {
            funcs,
            intermediate_descriptor,
            output_descriptor,
            num_keys: intermediate_descriptor.num_slots() - funcs.funcs().len(),
            needs_finalize,
        }
    }

    /// Produce the output tuple of the intermediate tuple, the output tuple is allocated
    /// in the `output_pool` and it does not reference the `tuple_pool`.
    ///
    /// When the output has the layout of the intermediate tuple, the states are finalized
    /// or serialized in place and the whole tuple is copied into the `output_pool`.
    /// Otherwise, the intermediate tuple is only read. In both cases, finalizing the same
    /// tuple again produces an equal output tuple
    ///
    /// # Safety
    ///
    /// `tuple` is a live intermediate tuple allocated in the `tuple_pool`
    pub(super) unsafe fn finalize(
        &self,
        tuple: TuplePtr,
        tuple_pool: &MemPool,
        output_pool: &MemPool,
    ) -> Result<TuplePtr> {
        let state_slots = &self.output_descriptor.slots()[self.num_keys..];
        unsafe {
            if self.intermediate_descriptor == self.output_descriptor {
                if self.needs_finalize {
                    self.funcs
                        .finalize_states(tuple, tuple, state_slots, tuple_pool)
                        .context(FinalizeSnafu)?;
                } else {
                    self.funcs
                        .serialize_states(tuple, tuple_pool)
                        .context(SerializeSnafu)?;
                }
                return tuple
                    .deep_copy(self.output_descriptor, output_pool)
                    .context(AllocateOutputSnafu);
            }

            let output = output_pool
                .allocate_tuple(self.output_descriptor)
                .context(AllocateOutputSnafu)?;
            for (src_slot, dst_slot) in self
                .intermediate_descriptor
                .slots()
                .iter()
                .zip(self.output_descriptor.slots())
                .take(self.num_keys)
            {
                tuple
                    .copy_slot_to(src_slot, output, dst_slot, output_pool)
                    .context(CopyKeySnafu)?;
            }
            self.funcs
                .finalize_states(tuple, output, state_slots, output_pool)
                .context(FinalizeSnafu)?;
            Ok(output)
        }
    }
}
