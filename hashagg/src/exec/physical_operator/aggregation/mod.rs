//! Hash aggregation operator
//!
//! [`AggregationNode`] is a blocking operator. `open` drains its child and builds one
//! intermediate tuple for each distinct group by key, `get_next` converts the
//! intermediate tuples into output tuples.
//!
//! The intermediate tuples live in the tuple pool of the node and they are referenced by
//! the hash table. The output tuples are copied into the pool of the output batch, they
//! never reference the tuple pool.

pub mod finalizer;
pub mod hash_table;
pub mod processor;
pub mod specializer;
pub mod tuple_factory;

use std::sync::Arc;

use snafu::{ensure, ResultExt, Snafu};
use tuple_block::batch::RowBatch;
use tuple_block::pool::MemPool;
use tuple_block::tuple::{TupleDescriptor, TuplePtr};
use tuple_block::types::LogicalType;

use self::finalizer::{FinalizeError, Finalizer};
use self::hash_table::{HashTable, IntoIter};
use self::processor::{
    BatchStatus, InterpretedUpdateTuple, ProcessError, Processor, SpecializedUpdateTuple,
};
use self::specializer::{
    CompiledUpdateTuple, KernelSpecializer, SpecializationRequest, Specializer,
};
use self::tuple_factory::{ConstructError, TupleFactory};
use super::{
    GetNextSnafu, OpenSnafu, OpenStatus, OperatorError, OperatorResult, PhysicalOperator,
    PrepareSnafu, ResetSnafu, SourceExecStatus, Stringify,
};
use crate::common::client_context::ClientContext;
use crate::common::profiler::ScopedTimerGuard;
use crate::exec::metric::{Count, Gauge, MetricsSet, Time};
use crate::exec::physical_expr::field_ref::FieldRef;
use crate::exec::physical_expr::function::aggregate::{
    AggregationFunction, AggregationFunctionList,
};
use crate::exec::physical_expr::utils::compact_display_expressions;
use crate::exec::physical_expr::PhysicalExpr;
use hashagg_procedural_macro::MetricsSetBuilder;

const NAME: &str = "Aggregation";

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum AggregationNodeError {
    #[snafu(display(
        "FieldRef `#{ref_index}` is out of range, the input of the aggregation only has `{input_size}` slots"
    ))]
    FieldRefOutOfRange { ref_index: usize, input_size: usize },
    #[snafu(display(
        "FieldRef `#{ref_index}` has logical type `{ref_type}`, however the input slot has logical type `{input_type}`"
    ))]
    FieldRefTypeMismatch {
        ref_index: usize,
        ref_type: LogicalType,
        input_type: LogicalType,
    },
    #[snafu(display("Failed to process the input batch"))]
    Process { source: ProcessError },
    #[snafu(display("Failed to construct the intermediate tuple of the aggregation without group by"))]
    ConstructSingleton { source: ConstructError },
    #[snafu(display("Failed to produce the output tuple"))]
    Finalize { source: FinalizeError },
}

type Result<T> = std::result::Result<T, AggregationNodeError>;

/// Options of the [`AggregationNode`], fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationNodeOptions {
    /// Output the final values of the functions. Otherwise, the node outputs the
    /// serialized intermediate values that can be merged by another aggregation
    pub needs_finalize: bool,
    /// Try to specialize the update in `prepare`
    pub enable_specialization: bool,
}

impl Default for AggregationNodeOptions {
    fn default() -> Self {
        Self {
            needs_finalize: true,
            enable_specialization: true,
        }
    }
}

/// Metrics of the [`AggregationNode`]. Counts and times accumulate across `reset`,
/// the hash table metrics describe the last build
#[derive(Debug, Default, MetricsSetBuilder)]
pub struct AggregationNodeMetrics {
    /// Number of rows consumed from the child
    num_input_rows: Count,
    /// Number of groups in the last build
    num_groups: Count,
    /// Number of rows produced
    num_output_rows: Count,
    /// Time spent in building the hash table, including the child
    build_time: Time,
    /// Time spent in producing the output
    get_results_time: Time,
    /// Number of buckets of the hash table
    hash_table_buckets: Count,
    /// Load factor of the hash table
    hash_table_load_factor: Gauge,
    /// Bytes allocated by the tuple pool
    tuple_pool_bytes: Count,
    /// 1 if the update is specialized
    specialized: Count,
}

/// Lifecycle of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Prepared,
    Opened,
    /// Failed or cancelled, waiting for `reset` or `close`
    Terminal,
    Closed,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Prepared => "Prepared",
            Self::Opened => "Opened",
            Self::Terminal => "Terminal",
            Self::Closed => "Closed",
        }
    }
}

/// How the intermediate tuple is updated
#[derive(Debug)]
enum UpdateStrategy {
    Interpreted,
    Specialized(CompiledUpdateTuple),
}

/// Intermediate tuples waiting for output
#[derive(Debug)]
enum OutputIter {
    Empty,
    Grouping(IntoIter),
    Singleton(Option<TuplePtr>),
}

impl OutputIter {
    #[inline]
    fn next(&mut self) -> Option<TuplePtr> {
        match self {
            Self::Empty => None,
            Self::Grouping(iter) => iter.next(),
            Self::Singleton(tuple) => tuple.take(),
        }
    }
}

/// Result of draining the child
enum BuildStatus {
    Built,
    Cancelled,
}

/// Hash based `GROUP BY` operator. Without group by exprs, it aggregates all of the
/// input rows into a single group
#[derive(Debug)]
pub struct AggregationNode {
    output_descriptor: Arc<TupleDescriptor>,
    intermediate_descriptor: TupleDescriptor,
    children: [Box<dyn PhysicalOperator>; 1],
    group_by_exprs: Vec<Arc<dyn PhysicalExpr>>,
    funcs: AggregationFunctionList,
    options: AggregationNodeOptions,
    specializer: Option<Arc<dyn Specializer>>,
    phase: Phase,
    strategy: UpdateStrategy,
    /// Owns the intermediate tuples and their variable length data
    tuple_pool: MemPool,
    hash_table: HashTable,
    /// The group of the aggregation without group by
    singleton: Option<TuplePtr>,
    output_iter: OutputIter,
    /// Batch pulled from the child, created in `prepare`
    input_batch: Option<RowBatch>,
    metrics: AggregationNodeMetrics,
}

impl AggregationNode {
    /// Create a new aggregation that groups the rows produced by the `input` with
    /// `group_by_exprs` and computes the `funcs` for each group.
    ///
    /// The output rows contain the group by keys followed by the values of the
    /// functions. With [`AggregationNodeOptions::needs_finalize`], the values are the
    /// final values. Otherwise, they are the intermediate values
    pub fn try_new(
        input: Box<dyn PhysicalOperator>,
        group_by_exprs: Vec<Arc<dyn PhysicalExpr>>,
        funcs: Vec<Arc<dyn AggregationFunction>>,
        options: AggregationNodeOptions,
    ) -> Result<Self> {
        let input_descriptor = input.output_descriptor();
        group_by_exprs
            .iter()
            .chain(funcs.iter().flat_map(|func| func.arguments()))
            .try_for_each(|expr| validate_field_refs(&**expr, input_descriptor))?;

        let key_types = group_by_exprs.iter().map(|expr| expr.output_type());
        let intermediate_descriptor = TupleDescriptor::new(
            key_types
                .clone()
                .chain(funcs.iter().map(|func| func.intermediate_type())),
        );
        let output_descriptor = Arc::new(TupleDescriptor::new(key_types.chain(
            funcs.iter().map(|func| {
                if options.needs_finalize {
                    func.return_type()
                } else {
                    func.intermediate_type()
                }
            }),
        )));
        let slots = intermediate_descriptor.slots()[group_by_exprs.len()..].to_vec();
        let funcs = AggregationFunctionList::new(funcs, slots);

        Ok(Self {
            output_descriptor,
            intermediate_descriptor,
            children: [input],
            group_by_exprs,
            funcs,
            options,
            specializer: Some(Arc::new(KernelSpecializer)),
            phase: Phase::Created,
            strategy: UpdateStrategy::Interpreted,
            tuple_pool: MemPool::new(),
            hash_table: HashTable::new(),
            singleton: None,
            output_iter: OutputIter::Empty,
            input_batch: None,
            metrics: AggregationNodeMetrics::default(),
        })
    }

    /// Replace the specializer. `None` disables the specialization
    pub fn with_specializer(mut self, specializer: Option<Arc<dyn Specializer>>) -> Self {
        self.specializer = specializer;
        self
    }

    /// Descriptor of the intermediate tuples
    pub fn intermediate_descriptor(&self) -> &TupleDescriptor {
        &self.intermediate_descriptor
    }

    /// Group by expressions
    pub fn group_by_exprs(&self) -> &[Arc<dyn PhysicalExpr>] {
        &self.group_by_exprs
    }

    /// Aggregation functions
    pub fn funcs(&self) -> &AggregationFunctionList {
        &self.funcs
    }

    #[cold]
    fn invalid_state(&self, expect: &'static str) -> OperatorError {
        OperatorError::InvalidState {
            op: NAME,
            expect,
            found: self.phase.as_str(),
        }
    }

    fn specialize(&self) -> UpdateStrategy {
        if !self.options.enable_specialization {
            return UpdateStrategy::Interpreted;
        }
        let Some(specializer) = &self.specializer else {
            return UpdateStrategy::Interpreted;
        };
        let request = SpecializationRequest {
            input_descriptor: self.children[0].output_descriptor(),
            funcs: &self.funcs,
        };
        match specializer.specialize(&request) {
            Ok(compiled) => {
                tracing::debug!(
                    "Aggregation: `{}` specialized the update into {} kernels",
                    specializer.name(),
                    compiled.num_kernels()
                );
                UpdateStrategy::Specialized(compiled)
            }
            Err(e) => {
                tracing::debug!(
                    "Aggregation: `{}` failed to specialize the update, fallback to the interpreted update: {}",
                    specializer.name(),
                    e
                );
                UpdateStrategy::Interpreted
            }
        }
    }

    /// Drain the child into the hash table
    fn build(&mut self, client_ctx: &ClientContext) -> OperatorResult<BuildStatus> {
        let Self {
            children: [child],
            group_by_exprs,
            funcs,
            intermediate_descriptor,
            strategy,
            tuple_pool,
            hash_table,
            singleton,
            input_batch,
            metrics,
            phase,
            ..
        } = self;

        let Some(batch) = input_batch.as_mut() else {
            return Err(OperatorError::InvalidState {
                op: NAME,
                expect: "Prepared",
                found: phase.as_str(),
            });
        };

        if child
            .open(client_ctx)
            .boxed()
            .context(OpenSnafu { op: NAME })?
            == OpenStatus::Cancelled
        {
            return Ok(BuildStatus::Cancelled);
        }

        let _guard = ScopedTimerGuard::new(&metrics.build_time);
        let funcs = &*funcs;
        let mut processor = Processor {
            group_by_exprs: group_by_exprs.as_slice(),
            factory: TupleFactory::new(intermediate_descriptor, funcs),
            pool: tuple_pool,
            hash_table,
            singleton,
        };

        loop {
            if client_ctx.is_cancelled() {
                return Ok(BuildStatus::Cancelled);
            }
            // The last batch may carry rows together with `Finished`
            let finished = match child
                .get_next(client_ctx, batch)
                .boxed()
                .context(OpenSnafu { op: NAME })?
            {
                SourceExecStatus::HaveMoreOutput => false,
                SourceExecStatus::Finished => true,
                SourceExecStatus::Cancelled => return Ok(BuildStatus::Cancelled),
            };
            if batch.is_empty() {
                if finished {
                    return Ok(BuildStatus::Built);
                }
                continue;
            }
            metrics.num_input_rows.add(batch.len() as u64);

            let batch = &*batch;
            let status = match &*strategy {
                UpdateStrategy::Interpreted => processor.process_batch(
                    batch,
                    &mut InterpretedUpdateTuple::new(funcs),
                    client_ctx,
                ),
                UpdateStrategy::Specialized(compiled) => processor.process_batch(
                    batch,
                    &mut SpecializedUpdateTuple::new(compiled),
                    client_ctx,
                ),
            }
            .context(ProcessSnafu)
            .boxed()
            .context(OpenSnafu { op: NAME })?;

            if status == BatchStatus::Cancelled {
                return Ok(BuildStatus::Cancelled);
            }
            if finished {
                return Ok(BuildStatus::Built);
            }
        }
    }

    /// Prepare the output after the child is drained
    fn finish_build(&mut self) -> Result<()> {
        if self.group_by_exprs.is_empty() {
            let factory = TupleFactory::new(&self.intermediate_descriptor, &self.funcs);
            // Aggregation without group by produces a row even if the input is empty
            if self.singleton.is_none() && !factory.is_zero_width() {
                // SAFETY: no keys
                let tuple = unsafe { factory.construct(&[], &self.tuple_pool) }
                    .context(ConstructSingletonSnafu)?;
                self.singleton = Some(tuple);
            }
            self.metrics
                .num_groups
                .set(u64::from(self.singleton.is_some()));
            self.output_iter = OutputIter::Singleton(self.singleton.take());
        } else {
            self.metrics.num_groups.set(self.hash_table.len() as u64);
            self.metrics
                .hash_table_buckets
                .set(self.hash_table.num_buckets() as u64);
            self.metrics
                .hash_table_load_factor
                .set(self.hash_table.load_factor());
            self.output_iter =
                OutputIter::Grouping(std::mem::take(&mut self.hash_table).into_iter());
        }
        self.metrics
            .tuple_pool_bytes
            .set(self.tuple_pool.allocated_bytes() as u64);
        Ok(())
    }

    /// Drop all of the tuples, the pool is reset after nobody references it
    fn discard_state(&mut self) {
        self.hash_table.clear();
        self.singleton = None;
        self.output_iter = OutputIter::Empty;
        self.tuple_pool.reset();
        if let Some(batch) = &mut self.input_batch {
            batch.reset();
        }
    }

    fn terminate(&mut self) {
        self.discard_state();
        self.phase = Phase::Terminal;
    }
}

/// Check the field refs in the expression against the input
fn validate_field_refs(expr: &dyn PhysicalExpr, input: &TupleDescriptor) -> Result<()> {
    if let Some(field_ref) = expr.as_any().downcast_ref::<FieldRef>() {
        let ref_index = field_ref.field_index();
        let Some(slot) = input.slots().get(ref_index) else {
            return FieldRefOutOfRangeSnafu {
                ref_index,
                input_size: input.num_slots(),
            }
            .fail();
        };
        ensure!(
            slot.logical_type() == field_ref.output_type(),
            FieldRefTypeMismatchSnafu {
                ref_index,
                ref_type: field_ref.output_type(),
                input_type: slot.logical_type()
            }
        );
    }
    expr.children()
        .iter()
        .try_for_each(|child| validate_field_refs(&**child, input))
}

impl Stringify for AggregationNode {
    fn name(&self) -> &'static str {
        NAME
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Aggregation: group_by=")?;
        compact_display_expressions(f, &self.group_by_exprs)?;
        write!(
            f,
            ", aggregation_functions={}, needs_finalize={}",
            self.funcs, self.options.needs_finalize
        )
    }
}

impl PhysicalOperator for AggregationNode {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn output_descriptor(&self) -> &Arc<TupleDescriptor> {
        &self.output_descriptor
    }

    fn children(&self) -> &[Box<dyn PhysicalOperator>] {
        &self.children
    }

    fn metrics(&self) -> MetricsSet {
        self.metrics.metrics_set()
    }

    fn prepare(&mut self, client_ctx: &ClientContext) -> OperatorResult<()> {
        if self.phase != Phase::Created {
            return Err(self.invalid_state("Created"));
        }
        self.children[0]
            .prepare(client_ctx)
            .boxed()
            .context(PrepareSnafu { op: NAME })?;

        self.tuple_pool = MemPool::with_limit(client_ctx.exec_args.mem_limit);
        self.strategy = self.specialize();
        self.metrics.specialized.set(u64::from(matches!(
            self.strategy,
            UpdateStrategy::Specialized(_)
        )));
        self.input_batch = Some(RowBatch::new(
            Arc::clone(self.children[0].output_descriptor()),
            client_ctx.exec_args.batch_size.max(1),
        ));
        self.phase = Phase::Prepared;
        Ok(())
    }

    fn open(&mut self, client_ctx: &ClientContext) -> OperatorResult<OpenStatus> {
        if self.phase != Phase::Prepared {
            return Err(self.invalid_state("Prepared"));
        }
        let span = tracing::info_span!("AggregationNode::open", query_id = %client_ctx.query_id);
        let _entered = span.enter();

        match self.build(client_ctx) {
            Ok(BuildStatus::Built) => (),
            Ok(BuildStatus::Cancelled) => {
                tracing::debug!("Aggregation: cancelled while building the hash table");
                self.terminate();
                return Ok(OpenStatus::Cancelled);
            }
            Err(e) => {
                self.terminate();
                return Err(e);
            }
        }

        if let Err(e) = self.finish_build() {
            self.terminate();
            return Err(e).boxed().context(OpenSnafu { op: NAME });
        }

        tracing::debug!(
            "Aggregation: aggregate {} rows into {} groups in `{:?}`. Hash table has {} buckets, load factor: {:.3}. Tuple pool allocated {} bytes",
            self.metrics.num_input_rows.value(),
            self.metrics.num_groups.value(),
            self.metrics.build_time.value(),
            self.metrics.hash_table_buckets.value(),
            self.metrics.hash_table_load_factor.value(),
            self.metrics.tuple_pool_bytes.value(),
        );
        self.phase = Phase::Opened;
        Ok(OpenStatus::Ready)
    }

    fn get_next(
        &mut self,
        client_ctx: &ClientContext,
        output: &mut RowBatch,
    ) -> OperatorResult<SourceExecStatus> {
        output.reset();
        if self.phase != Phase::Opened {
            return Err(self.invalid_state("Opened"));
        }
        assert_eq!(
            **output.descriptor(),
            *self.output_descriptor,
            "Output batch of the Aggregation has a different descriptor"
        );
        if client_ctx.is_cancelled() {
            self.terminate();
            return Ok(SourceExecStatus::Cancelled);
        }

        let finalized = {
            let _guard = ScopedTimerGuard::new(&self.metrics.get_results_time);
            let finalizer = Finalizer::new(
                &self.funcs,
                &self.intermediate_descriptor,
                &self.output_descriptor,
                self.options.needs_finalize,
            );
            let mut finalized = Ok(());
            while !output.is_full() {
                let Some(tuple) = self.output_iter.next() else {
                    break;
                };
                // SAFETY: the tuple comes from the hash table, it is allocated in the
                // tuple pool and it is finalized exactly once
                match unsafe { finalizer.finalize(tuple, &self.tuple_pool, output.pool()) } {
                    // SAFETY: the output tuple is allocated in the pool of the output
                    Ok(output_tuple) => unsafe { output.add_tuple(output_tuple) },
                    Err(e) => {
                        finalized = Err(e);
                        break;
                    }
                }
            }
            finalized
        };

        if let Err(e) = finalized {
            self.terminate();
            output.reset();
            return Err(e)
                .context(FinalizeSnafu)
                .boxed()
                .context(GetNextSnafu { op: NAME });
        }

        self.metrics.num_output_rows.add(output.len() as u64);
        if output.is_empty() {
            Ok(SourceExecStatus::Finished)
        } else {
            Ok(SourceExecStatus::HaveMoreOutput)
        }
    }

    fn reset(&mut self, client_ctx: &ClientContext) -> OperatorResult<()> {
        if matches!(self.phase, Phase::Created | Phase::Closed) {
            return Err(self.invalid_state("Prepared"));
        }
        self.discard_state();
        self.children[0]
            .reset(client_ctx)
            .boxed()
            .context(ResetSnafu { op: NAME })?;
        self.phase = Phase::Prepared;
        Ok(())
    }

    fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.discard_state();
        self.tuple_pool = MemPool::new();
        self.input_batch = None;
        self.children[0].close();
        self.phase = Phase::Closed;
    }
}
