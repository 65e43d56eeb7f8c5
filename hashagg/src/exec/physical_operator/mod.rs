//! Physical operators
//!
//! Operators form a tree, each operator exclusively owns its children and pulls
//! [`RowBatch`]es from them. The lifecycle of an operator is:
//!
//! ```text
//! prepare ──► open ──► get_next* ──► close
//!               ▲          │
//!               └─ reset ◄─┘
//! ```
//!
//! `close` can be called at any point and it is idempotent.

pub mod aggregation;
pub mod memory_table_scan;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use snafu::Snafu;
use tuple_block::batch::RowBatch;
use tuple_block::tuple::TupleDescriptor;

use crate::common::client_context::ClientContext;
use crate::error::SendableError;
use crate::exec::metric::MetricsSet;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum OperatorError {
    #[snafu(display("Failed to prepare the `{op}` operator"))]
    Prepare {
        op: &'static str,
        source: SendableError,
    },
    #[snafu(display("Failed to open the `{op}` operator"))]
    Open {
        op: &'static str,
        source: SendableError,
    },
    #[snafu(display("Failed to get the next batch from the `{op}` operator"))]
    GetNext {
        op: &'static str,
        source: SendableError,
    },
    #[snafu(display("Failed to reset the `{op}` operator"))]
    Reset {
        op: &'static str,
        source: SendableError,
    },
    #[snafu(display(
        "Invalid state of the `{op}` operator: expect the operator is `{expect}`, found `{found}`"
    ))]
    InvalidState {
        op: &'static str,
        expect: &'static str,
        found: &'static str,
    },
}

type Result<T> = std::result::Result<T, OperatorError>;
// Used by the children modules
type OperatorResult<T> = Result<T>;

/// Stringify the physical operator
pub trait Stringify {
    /// Get name of the physical operator
    fn name(&self) -> &'static str;

    /// Debug message
    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;

    /// Display the operator without the children info
    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
}

/// Status returned by [`PhysicalOperator::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// The operator is ready to produce output
    Ready,
    /// The query is cancelled while opening the operator. The operator produces nothing,
    /// caller should close it
    Cancelled,
}

/// SourceExecStatus indicates the status of the operator for the `get_next` call.
/// Caller should check this status and decide whether to pull again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExecStatus {
    /// Operator have more output, caller should pull it again.
    ///
    /// Note that if this status is returned, the output batch should **not** be empty
    HaveMoreOutput,
    /// The operator is exhausted, no more rows will be produced by this operator
    ///
    /// Operators in this crate return it with an empty batch. A source may return its
    /// last rows together with this status, consumers should process the batch before
    /// they stop pulling
    Finished,
    /// The query is cancelled. The output batch is empty and the operator should be
    /// closed or reset
    Cancelled,
}

/// Physical operator is the node in the physical plan, it pulls batches from its children
/// and produces batches with its [`output_descriptor`](Self::output_descriptor).
///
/// Note that we do not provide default implementation. Because we want to avoid the case
/// that compiler compiles but user forget to implement the method that should implement.
pub trait PhysicalOperator: Send + Stringify + 'static {
    /// As any for dynamic casting
    fn as_any(&self) -> &dyn std::any::Any;

    /// Descriptor of the tuples produced by this operator
    fn output_descriptor(&self) -> &Arc<TupleDescriptor>;

    /// Get children of this operator
    fn children(&self) -> &[Box<dyn PhysicalOperator>];

    /// Snapshot of the metrics of this operator
    fn metrics(&self) -> MetricsSet;

    /// Allocate the resources that do not depend on the input. Called exactly once,
    /// before [`open`](Self::open). Implementation should prepare its children
    fn prepare(&mut self, client_ctx: &ClientContext) -> Result<()>;

    /// Open the operator. Blocking operators consume the whole input of their children
    /// here. Implementation should open its children
    fn open(&mut self, client_ctx: &ClientContext) -> Result<OpenStatus>;

    /// Reset the `output` and fill it with up to `output.capacity()` rows.
    ///
    /// # Panics
    ///
    /// Implementation will panic if the `output` does not have the descriptor returned
    /// by [`output_descriptor`](Self::output_descriptor)
    fn get_next(
        &mut self,
        client_ctx: &ClientContext,
        output: &mut RowBatch,
    ) -> Result<SourceExecStatus>;

    /// Discard the state produced by `open` and `get_next`, return to the state after
    /// `prepare`. The operator can be opened again and produces the same output as a
    /// fresh operator. Implementation should reset its children
    fn reset(&mut self, client_ctx: &ClientContext) -> Result<()>;

    /// Release all of the resources. Calling it more than once is a no-op. Implementation
    /// should close its children
    fn close(&mut self);
}

// Implement traits for dyn PhysicalOperator

impl Debug for dyn PhysicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.debug(f)
    }
}

impl Display for dyn PhysicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

/// Pull all of the rows out of the operator. The operator should have been opened.
/// Returns `None` if the query is cancelled
#[cfg(test)]
pub(crate) fn collect_rows(
    op: &mut dyn PhysicalOperator,
    client_ctx: &ClientContext,
) -> Result<Option<Vec<Vec<Option<tuple_block::scalar::ScalarImpl>>>>> {
    let mut output = RowBatch::new(
        Arc::clone(op.output_descriptor()),
        client_ctx.exec_args.batch_size,
    );
    let mut rows = Vec::new();
    loop {
        match op.get_next(client_ctx, &mut output)? {
            SourceExecStatus::HaveMoreOutput => {
                assert!(!output.is_empty());
                rows.extend(output.rows().map(|row| row.to_owned_values()));
            }
            SourceExecStatus::Finished => {
                assert!(output.is_empty());
                return Ok(Some(rows));
            }
            SourceExecStatus::Cancelled => return Ok(None),
        }
    }
}
