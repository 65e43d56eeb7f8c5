//! Process the input batches: the hot loop of the aggregation
//!
//! The loop is monomorphized over the [`UpdateTuple`] strategy, the interpreted strategy
//! and the specialized strategy share the same loop

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tuple_block::batch::RowBatch;
use tuple_block::pool::MemPool;
use tuple_block::scalar::{group_eq, ScalarRef};
use tuple_block::tuple::{TuplePtr, TupleRef};

use super::hash_table::{HashTable, HashTableError};
use super::specializer::CompiledUpdateTuple;
use super::tuple_factory::{ConstructError, TupleFactory};
use crate::common::client_context::ClientContext;
use crate::common::utils::hash::hash_group_by_values;
use crate::exec::physical_expr::function::aggregate::{AggregationError, AggregationFunctionList};
use crate::exec::physical_expr::{ExprError, PhysicalExpr};

/// Check the cancellation every `CANCELLATION_CHECK_INTERVAL` rows
const CANCELLATION_CHECK_INTERVAL: usize = 256;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum ProcessError {
    #[snafu(display("Failed to evaluate the group by key"))]
    EvaluateGroupByKey { source: ExprError },
    #[snafu(display("Failed to evaluate the arguments of the aggregation functions"))]
    EvaluateArgs { source: ExprError },
    #[snafu(display("Failed to construct the intermediate tuple of the new group"))]
    Construct { source: ConstructError },
    #[snafu(display("Failed to insert the new group"))]
    HashTable { source: HashTableError },
    #[snafu(display("Failed to update the intermediate tuple"))]
    Update { source: AggregationError },
}

impl From<HashTableError> for ProcessError {
    fn from(source: HashTableError) -> Self {
        Self::HashTable { source }
    }
}

type Result<T> = std::result::Result<T, ProcessError>;

/// Whether the batch is processed completely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BatchStatus {
    Processed,
    Cancelled,
}

/// Strategy that updates the intermediate tuple with an input row
pub(super) trait UpdateTuple<'a> {
    /// Update the intermediate tuple with the row. Arguments of all of the functions are
    /// evaluated before any state is mutated
    ///
    /// # Safety
    ///
    /// `tuple` is a live intermediate tuple allocated in the `pool`
    unsafe fn update_tuple(&mut self, tuple: TuplePtr, row: TupleRef<'a>, pool: &MemPool)
    -> Result<()>;
}

/// Interprets the aggregation functions and their arguments for each row
#[derive(Debug)]
pub(super) struct InterpretedUpdateTuple<'a> {
    funcs: &'a AggregationFunctionList,
    /// Arguments of the current row
    args: Vec<Option<ScalarRef<'a>>>,
}

impl<'a> InterpretedUpdateTuple<'a> {
    pub(super) fn new(funcs: &'a AggregationFunctionList) -> Self {
        Self {
            funcs,
            args: Vec::with_capacity(funcs.num_args()),
        }
    }
}

impl<'a> UpdateTuple<'a> for InterpretedUpdateTuple<'a> {
    #[inline]
    unsafe fn update_tuple(
        &mut self,
        tuple: TuplePtr,
        row: TupleRef<'a>,
        pool: &MemPool,
    ) -> Result<()> {
        self.args.clear();
        self.funcs
            .evaluate_args(row, &mut self.args)
            .context(EvaluateArgsSnafu)?;
        unsafe { self.funcs.update_states(tuple, &self.args, pool) }.context(UpdateSnafu)
    }
}

/// Runs the kernels produced by the specializer
#[derive(Debug)]
pub(super) struct SpecializedUpdateTuple<'a> {
    compiled: &'a CompiledUpdateTuple,
}

impl<'a> SpecializedUpdateTuple<'a> {
    pub(super) fn new(compiled: &'a CompiledUpdateTuple) -> Self {
        Self { compiled }
    }
}

impl<'a> UpdateTuple<'a> for SpecializedUpdateTuple<'a> {
    #[inline]
    unsafe fn update_tuple(
        &mut self,
        tuple: TuplePtr,
        row: TupleRef<'a>,
        _pool: &MemPool,
    ) -> Result<()> {
        // SAFETY: the compiled kernels are verified against the input descriptor
        unsafe { self.compiled.update(tuple, row.ptr()) };
        Ok(())
    }
}

/// Processes the input batches, it borrows the state of the operator during the build
/// phase
#[derive(Debug)]
pub(super) struct Processor<'n> {
    pub(super) group_by_exprs: &'n [Arc<dyn PhysicalExpr>],
    pub(super) factory: TupleFactory<'n>,
    pub(super) pool: &'n MemPool,
    pub(super) hash_table: &'n mut HashTable,
    pub(super) singleton: &'n mut Option<TuplePtr>,
}

impl<'n> Processor<'n> {
    /// Process the batch with the update strategy
    pub(super) fn process_batch<'b, U>(
        &mut self,
        batch: &'b RowBatch,
        update: &mut U,
        client_ctx: &ClientContext,
    ) -> Result<BatchStatus>
    where
        'n: 'b,
        U: UpdateTuple<'b>,
    {
        if self.group_by_exprs.is_empty() {
            self.process_batch_no_grouping(batch, update, client_ctx)
        } else {
            self.process_batch_with_grouping(batch, update, client_ctx)
        }
    }

    /// All of the rows update the singleton tuple, it is constructed on the first row
    fn process_batch_no_grouping<'b, U>(
        &mut self,
        batch: &'b RowBatch,
        update: &mut U,
        client_ctx: &ClientContext,
    ) -> Result<BatchStatus>
    where
        'n: 'b,
        U: UpdateTuple<'b>,
    {
        // Nothing to aggregate, the output has zero width
        if self.factory.is_zero_width() {
            return Ok(if client_ctx.is_cancelled() {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Processed
            });
        }

        for (index, row) in batch.rows().enumerate() {
            if index % CANCELLATION_CHECK_INTERVAL == 0 && client_ctx.is_cancelled() {
                return Ok(BatchStatus::Cancelled);
            }

            let tuple = match *self.singleton {
                Some(tuple) => tuple,
                None => {
                    // SAFETY: no keys
                    let tuple = unsafe { self.factory.construct(&[], self.pool) }
                        .context(ConstructSnafu)?;
                    *self.singleton = Some(tuple);
                    tuple
                }
            };
            // SAFETY: the singleton is allocated in the pool
            unsafe { update.update_tuple(tuple, row, self.pool)? };
        }
        Ok(BatchStatus::Processed)
    }

    /// Each row finds or inserts its group, then updates the tuple of the group
    fn process_batch_with_grouping<'b, U>(
        &mut self,
        batch: &'b RowBatch,
        update: &mut U,
        client_ctx: &ClientContext,
    ) -> Result<BatchStatus>
    where
        'n: 'b,
        U: UpdateTuple<'b>,
    {
        let group_by_exprs: &'b [Arc<dyn PhysicalExpr>] = self.group_by_exprs;
        let factory = self.factory;
        let pool = self.pool;
        let key_slots = &factory.descriptor().slots()[..group_by_exprs.len()];
        let mut keys: Vec<Option<ScalarRef<'b>>> = Vec::with_capacity(group_by_exprs.len());

        for (index, row) in batch.rows().enumerate() {
            if index % CANCELLATION_CHECK_INTERVAL == 0 && client_ctx.is_cancelled() {
                return Ok(BatchStatus::Cancelled);
            }

            keys.clear();
            for expr in group_by_exprs {
                keys.push(expr.evaluate(row).context(EvaluateGroupByKeySnafu)?);
            }
            let hash_value = hash_group_by_values(&keys);

            let (tuple, _) = self.hash_table.find_or_insert_with(
                hash_value,
                |tuple| {
                    keys.iter().zip(key_slots).all(|(key, slot)| {
                        // SAFETY: tuples in the hash table are allocated in the pool with
                        // the intermediate descriptor
                        group_eq(*key, unsafe { tuple.get(slot) })
                    })
                },
                // SAFETY: types of the group by exprs match the key slots
                || unsafe { factory.construct(&keys, pool) }.context(ConstructSnafu),
            )?;

            // SAFETY: the tuple is allocated in the pool
            unsafe { update.update_tuple(tuple, row, pool)? };
        }
        Ok(BatchStatus::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::client_context::tests::mock_client_context;
    use crate::exec::physical_expr::arith::{Arith, ArithOperator};
    use crate::exec::physical_expr::field_ref::FieldRef;
    use crate::exec::physical_expr::function::aggregate::count::CountStar;
    use crate::exec::physical_expr::function::aggregate::sum::Sum;
    use crate::exec::physical_expr::function::aggregate::{
        AggregationFunction, AggregationMode,
    };
    use tuple_block::tuple::TupleDescriptor;
    use tuple_block::types::LogicalType;

    struct Fixture {
        group_by_exprs: Vec<Arc<dyn PhysicalExpr>>,
        descriptor: TupleDescriptor,
        funcs: AggregationFunctionList,
        pool: MemPool,
        hash_table: HashTable,
        singleton: Option<TuplePtr>,
    }

    impl Fixture {
        /// `select c0, count(*), sum(c1 / c2) group by c0` if grouping
        fn new(grouping: bool) -> Self {
            let group_by_exprs: Vec<Arc<dyn PhysicalExpr>> = if grouping {
                vec![Arc::new(FieldRef::new(0, LogicalType::VarChar))]
            } else {
                Vec::new()
            };
            let div = Arith::try_new(
                Arc::new(FieldRef::new(1, LogicalType::BigInt)),
                ArithOperator::Div,
                Arc::new(FieldRef::new(2, LogicalType::BigInt)),
            )
            .unwrap();
            let funcs: Vec<Arc<dyn AggregationFunction>> = vec![
                Arc::new(CountStar::new()),
                Arc::new(Sum::try_new(Arc::new(div), AggregationMode::Update).unwrap()),
            ];
            let descriptor = TupleDescriptor::new(
                group_by_exprs
                    .iter()
                    .map(|expr| expr.output_type())
                    .chain(funcs.iter().map(|func| func.intermediate_type())),
            );
            let funcs = AggregationFunctionList::new(
                funcs,
                descriptor.slots()[group_by_exprs.len()..].to_vec(),
            );
            Self {
                group_by_exprs,
                descriptor,
                funcs,
                pool: MemPool::new(),
                hash_table: HashTable::new(),
                singleton: None,
            }
        }

        fn process(&mut self, batch: &RowBatch, client_ctx: &ClientContext) -> Result<BatchStatus> {
            let mut processor = Processor {
                group_by_exprs: &self.group_by_exprs,
                factory: TupleFactory::new(&self.descriptor, &self.funcs),
                pool: &self.pool,
                hash_table: &mut self.hash_table,
                singleton: &mut self.singleton,
            };
            processor.process_batch(
                batch,
                &mut InterpretedUpdateTuple::new(&self.funcs),
                client_ctx,
            )
        }

        fn groups(&mut self) -> Vec<String> {
            let tuples = match self.singleton {
                Some(tuple) => vec![tuple],
                None => std::mem::take(&mut self.hash_table).into_iter().collect(),
            };
            let mut groups = tuples
                .into_iter()
                .map(|tuple| unsafe { TupleRef::new(tuple, &self.descriptor) }.to_string())
                .collect::<Vec<_>>();
            groups.sort();
            groups
        }
    }

    fn batch(rows: &[(Option<&str>, i64, i64)]) -> RowBatch {
        let mut batch = RowBatch::new(
            Arc::new(TupleDescriptor::new([
                LogicalType::VarChar,
                LogicalType::BigInt,
                LogicalType::BigInt,
            ])),
            rows.len().max(1),
        );
        for (key, lhs, rhs) in rows {
            batch
                .push_row(&[
                    key.map(ScalarRef::String),
                    Some(ScalarRef::Int64(*lhs)),
                    Some(ScalarRef::Int64(*rhs)),
                ])
                .unwrap();
        }
        batch
    }

    #[test]
    fn test_process_with_grouping() {
        let client_ctx = mock_client_context();
        let mut fixture = Fixture::new(true);
        let status = fixture
            .process(
                &batch(&[(Some("a"), 2, 1), (None, 9, 3), (Some("b"), 4, 2)]),
                &client_ctx,
            )
            .unwrap();
        assert_eq!(status, BatchStatus::Processed);
        // The first batch is dropped, keys are copied into the pool
        fixture
            .process(&batch(&[(Some("a"), 6, 2), (None, 1, 1)]), &client_ctx)
            .unwrap();
        assert_eq!(fixture.groups(), ["Null,2,4,", "a,2,5,", "b,1,2,"]);
    }

    #[test]
    fn test_process_without_grouping() {
        let client_ctx = mock_client_context();
        let mut fixture = Fixture::new(false);
        fixture
            .process(&batch(&[(Some("a"), 2, 1), (None, 9, 3)]), &client_ctx)
            .unwrap();
        fixture
            .process(&batch(&[(Some("b"), 4, 2)]), &client_ctx)
            .unwrap();
        assert_eq!(fixture.groups(), ["3,7,"]);
    }

    #[test]
    fn test_failed_row_is_not_aggregated() {
        let client_ctx = mock_client_context();
        let mut fixture = Fixture::new(false);
        let err = fixture
            .process(&batch(&[(Some("a"), 2, 1), (Some("a"), 1, 0)]), &client_ctx)
            .unwrap_err();
        assert!(matches!(err, ProcessError::EvaluateArgs { .. }));
        // count(*) does not see the failed row
        assert_eq!(fixture.groups(), ["1,2,"]);
    }

    #[test]
    fn test_cancelled() {
        let client_ctx = mock_client_context();
        client_ctx.cancel();
        let mut fixture = Fixture::new(true);
        let status = fixture
            .process(&batch(&[(Some("a"), 2, 1)]), &client_ctx)
            .unwrap();
        assert_eq!(status, BatchStatus::Cancelled);
        assert!(fixture.hash_table.is_empty());
    }
}
