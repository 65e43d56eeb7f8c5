//! Construct the intermediate tuples

use snafu::{ResultExt, Snafu};
use tuple_block::pool::{MemPool, PoolError};
use tuple_block::scalar::ScalarRef;
use tuple_block::tuple::{TupleDescriptor, TuplePtr};

use crate::exec::physical_expr::function::aggregate::{AggregationError, AggregationFunctionList};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum ConstructError {
    #[snafu(display("Failed to allocate the intermediate tuple in the tuple pool"))]
    AllocateTuple { source: PoolError },
    #[snafu(display("Failed to copy the group by key into the tuple pool"))]
    CopyKey { source: PoolError },
    #[snafu(display("Failed to init the aggregation states of the intermediate tuple"))]
    InitStates { source: AggregationError },
}

/// Factory of the intermediate tuples. The leading slots of the intermediate tuple are
/// the group by keys, the trailing slots are the states of the aggregation functions
#[derive(Debug, Clone, Copy)]
pub(super) struct TupleFactory<'a> {
    descriptor: &'a TupleDescriptor,
    funcs: &'a AggregationFunctionList,
}

impl<'a> TupleFactory<'a> {
    pub(super) fn new(descriptor: &'a TupleDescriptor, funcs: &'a AggregationFunctionList) -> Self {
        debug_assert!(descriptor.num_slots() >= funcs.funcs().len());
        Self { descriptor, funcs }
    }

    /// Descriptor of the intermediate tuple
    #[inline]
    pub(super) fn descriptor(&self) -> &'a TupleDescriptor {
        self.descriptor
    }

    /// Number of the group by keys
    #[inline]
    pub(super) fn num_keys(&self) -> usize {
        self.descriptor.num_slots() - self.funcs.funcs().len()
    }

    /// The intermediate tuple has neither keys nor states
    #[inline]
    pub(super) fn is_zero_width(&self) -> bool {
        self.descriptor.num_slots() == 0
    }

    /// Construct a new intermediate tuple in the `pool`. Variable length keys are deep
    /// copied into the `pool`, such that the tuple does not reference the input batch
    ///
    /// # Safety
    ///
    /// Physical types of the keys must match the key slots
    #[inline]
    pub(super) unsafe fn construct(
        &self,
        keys: &[Option<ScalarRef<'_>>],
        pool: &MemPool,
    ) -> Result<TuplePtr, ConstructError> {
        debug_assert_eq!(keys.len(), self.num_keys());
        let tuple = pool.allocate_tuple(self.descriptor).context(AllocateTupleSnafu)?;
        unsafe {
            for (key, slot) in keys.iter().zip(self.descriptor.slots()) {
                tuple.set(slot, *key, pool).context(CopyKeySnafu)?;
            }
            self.funcs
                .init_states(tuple, pool)
                .context(InitStatesSnafu)?;
        }
        Ok(tuple)
    }
}
