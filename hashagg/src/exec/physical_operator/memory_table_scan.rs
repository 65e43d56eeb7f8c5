//! A table scan operator that produces the rows stored in memory

use std::sync::Arc;

use snafu::{ensure, ResultExt, Snafu};
use tuple_block::batch::RowBatch;
use tuple_block::scalar::ScalarImpl;
use tuple_block::tuple::TupleDescriptor;
use tuple_block::types::{LogicalType, PhysicalType};

use super::{
    GetNextSnafu, OpenStatus, OperatorError, OperatorResult, PhysicalOperator, SourceExecStatus,
    Stringify,
};
use crate::common::client_context::ClientContext;
use crate::exec::metric::{Count, MetricsSet};
use hashagg_procedural_macro::MetricsSetBuilder;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum MemoryTableScanError {
    #[snafu(display("Row `{row}` has `{found}` values, however the table has `{expect}` columns"))]
    ArityMismatch {
        row: usize,
        expect: usize,
        found: usize,
    },
    #[snafu(display(
        "Value in row `{row}` column `{column}` has physical type `{found:?}`, however the column has logical type `{expect}`"
    ))]
    TypeMismatch {
        row: usize,
        column: usize,
        expect: LogicalType,
        found: PhysicalType,
    },
}

type Result<T> = std::result::Result<T, MemoryTableScanError>;

/// Metrics of the [`MemoryTableScan`]
#[derive(Debug, Default, MetricsSetBuilder)]
pub struct MemoryTableScanMetrics {
    /// Number of rows produced
    num_output_rows: Count,
}

/// Table scan that produces the rows stored in memory, in order
#[derive(Debug)]
pub struct MemoryTableScan {
    output_descriptor: Arc<TupleDescriptor>,
    rows: Vec<Vec<Option<ScalarImpl>>>,
    /// Index of the next row to produce, `None` if the scan is not opened
    cursor: Option<usize>,
    children: Vec<Box<dyn PhysicalOperator>>,
    metrics: MemoryTableScanMetrics,
}

impl MemoryTableScan {
    /// Try to create a new [`MemoryTableScan`], each row should match the logical types
    pub fn try_new(
        logical_types: impl IntoIterator<Item = LogicalType>,
        rows: Vec<Vec<Option<ScalarImpl>>>,
    ) -> Result<Self> {
        let output_descriptor = Arc::new(TupleDescriptor::new(logical_types));
        let expect = output_descriptor.num_slots();
        for (row_index, row) in rows.iter().enumerate() {
            ensure!(
                row.len() == expect,
                ArityMismatchSnafu {
                    row: row_index,
                    expect,
                    found: row.len()
                }
            );
            for (column, (value, slot)) in row.iter().zip(output_descriptor.slots()).enumerate() {
                if let Some(value) = value {
                    ensure!(
                        value.physical_type() == slot.physical_type(),
                        TypeMismatchSnafu {
                            row: row_index,
                            column,
                            expect: slot.logical_type(),
                            found: value.physical_type()
                        }
                    );
                }
            }
        }

        Ok(Self {
            output_descriptor,
            rows,
            cursor: None,
            children: Vec::new(),
            metrics: MemoryTableScanMetrics::default(),
        })
    }

    /// Number of rows in the table
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl Stringify for MemoryTableScan {
    fn name(&self) -> &'static str {
        "MemoryTableScan"
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }

    fn display(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemoryTableScan: output_types={}, num_rows={}",
            self.output_descriptor,
            self.rows.len()
        )
    }
}

impl PhysicalOperator for MemoryTableScan {
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

    fn prepare(&mut self, _client_ctx: &ClientContext) -> OperatorResult<()> {
        Ok(())
    }

    fn open(&mut self, client_ctx: &ClientContext) -> OperatorResult<OpenStatus> {
        if client_ctx.is_cancelled() {
            return Ok(OpenStatus::Cancelled);
        }
        self.cursor = Some(0);
        Ok(OpenStatus::Ready)
    }

    fn get_next(
        &mut self,
        client_ctx: &ClientContext,
        output: &mut RowBatch,
    ) -> OperatorResult<SourceExecStatus> {
        output.reset();
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(OperatorError::InvalidState {
                op: "MemoryTableScan",
                expect: "Opened",
                found: "NotOpened",
            });
        };
        if client_ctx.is_cancelled() {
            return Ok(SourceExecStatus::Cancelled);
        }

        let end = self.rows.len().min(*cursor + output.capacity());
        let mut values = Vec::with_capacity(self.output_descriptor.num_slots());
        for row in &self.rows[*cursor..end] {
            values.clear();
            values.extend(row.iter().map(|value| value.as_ref().map(|v| v.as_scalar_ref())));
            output
                .push_row(&values)
                .boxed()
                .context(GetNextSnafu {
                    op: "MemoryTableScan",
                })?;
        }
        self.metrics.num_output_rows.add((end - *cursor) as u64);
        *cursor = end;

        if output.is_empty() {
            Ok(SourceExecStatus::Finished)
        } else {
            Ok(SourceExecStatus::HaveMoreOutput)
        }
    }

    fn reset(&mut self, _client_ctx: &ClientContext) -> OperatorResult<()> {
        self.cursor = None;
        Ok(())
    }

    fn close(&mut self) {
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::client_context::tests::mock_client_context;
    use crate::exec::physical_operator::collect_rows;
    use snafu::Report;

    fn int_rows(values: impl IntoIterator<Item = i32>) -> Vec<Vec<Option<ScalarImpl>>> {
        values
            .into_iter()
            .map(|v| vec![Some(ScalarImpl::Int32(v))])
            .collect()
    }

    #[test]
    fn test_scan_in_batches() -> Report<OperatorError> {
        Report::capture(|| {
            let client_ctx = mock_client_context();
            let mut scan =
                MemoryTableScan::try_new([LogicalType::Integer], int_rows(0..10)).unwrap();
            scan.prepare(&client_ctx)?;
            assert_eq!(scan.open(&client_ctx)?, OpenStatus::Ready);

            let mut output = RowBatch::new(Arc::clone(scan.output_descriptor()), 4);
            let mut lens = Vec::new();
            while scan.get_next(&client_ctx, &mut output)? == SourceExecStatus::HaveMoreOutput {
                lens.push(output.len());
            }
            assert_eq!(lens, [4, 4, 2]);
            assert_eq!(scan.metrics().count("num_output_rows"), Some(10));

            // Reset then rerun produces the same rows
            scan.reset(&client_ctx)?;
            scan.open(&client_ctx)?;
            let rows = collect_rows(&mut scan, &client_ctx)?.unwrap();
            assert_eq!(rows, int_rows(0..10));
            Ok(())
        })
    }

    #[test]
    fn test_get_next_before_open() {
        let client_ctx = mock_client_context();
        let mut scan = MemoryTableScan::try_new([LogicalType::Integer], int_rows(0..1)).unwrap();
        let mut output = RowBatch::new(Arc::clone(scan.output_descriptor()), 4);
        let err = scan.get_next(&client_ctx, &mut output).unwrap_err();
        assert!(matches!(err, OperatorError::InvalidState { .. }));
    }

    #[test]
    fn test_invalid_rows() {
        let err = MemoryTableScan::try_new(
            [LogicalType::Integer, LogicalType::VarChar],
            vec![vec![Some(ScalarImpl::Int32(1)), Some(ScalarImpl::Int64(2))]],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Value in row `0` column `1` has physical type `Int64`, however the column has logical type `VarChar`"
        );

        let err = MemoryTableScan::try_new([LogicalType::Integer], vec![vec![]]).unwrap_err();
        assert!(matches!(err, MemoryTableScanError::ArityMismatch { .. }));
    }
}
