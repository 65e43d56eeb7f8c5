//! A batch of rows that have the same [`TupleDescriptor`]
//!
//! The batch owns a [`MemPool`], tuples added to the batch and their variable length
//! data live in this pool. [`RowBatch::reset`] frees them in bulk

use std::fmt::Display;
use std::sync::Arc;

use snafu::{ensure, ResultExt, Snafu};
use tabled::builder::Builder as TableBuilder;

use crate::pool::{MemPool, PoolError};
use crate::scalar::ScalarRef;
use crate::tuple::{TupleDescriptor, TuplePtr, TupleRef};
use crate::types::{LogicalType, PhysicalType};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum RowBatchError {
    #[snafu(display("RowBatch is full, its capacity is `{capacity}`"))]
    Full { capacity: usize },
    #[snafu(display(
        "Row has `{found}` values, however the descriptor of the RowBatch has `{expect}` slots"
    ))]
    ArityMismatch { expect: usize, found: usize },
    #[snafu(display(
        "Value of the slot `{index}` has physical type `{found:?}`, however the slot has logical type `{expect}`"
    ))]
    TypeMismatch {
        index: usize,
        expect: LogicalType,
        found: PhysicalType,
    },
    #[snafu(display("Failed to allocate the row in the pool of RowBatch"))]
    Allocate { source: PoolError },
}

type Result<T> = std::result::Result<T, RowBatchError>;

/// A batch of rows
#[derive(Debug)]
pub struct RowBatch {
    descriptor: Arc<TupleDescriptor>,
    pool: MemPool,
    tuples: Vec<TuplePtr>,
    capacity: usize,
}

impl RowBatch {
    /// Create an empty batch that can hold at most `capacity` rows
    ///
    /// # Panics
    ///
    /// Panics if the capacity is 0
    pub fn new(descriptor: Arc<TupleDescriptor>, capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity of the RowBatch must be greater than 0");
        Self {
            descriptor,
            pool: MemPool::new(),
            tuples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Descriptor of the rows
    #[inline]
    pub fn descriptor(&self) -> &Arc<TupleDescriptor> {
        &self.descriptor
    }

    /// Pool that owns the rows in the batch
    #[inline]
    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    /// Number of rows in the batch
    #[inline]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns true if the batch has no row
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Maximum number of rows in the batch
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if the batch reaches its capacity
    #[inline]
    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.capacity
    }

    /// Add a tuple to the batch
    ///
    /// # Safety
    ///
    /// The tuple must be allocated with the descriptor of the batch, in the pool of the
    /// batch. Variable length data of the tuple must be in the pool of the batch as well
    ///
    /// # Panics
    ///
    /// Panics if the batch is full
    #[inline]
    pub unsafe fn add_tuple(&mut self, tuple: TuplePtr) {
        assert!(!self.is_full(), "RowBatch is full");
        self.tuples.push(tuple);
    }

    /// Copy the values into a new row at the end of the batch
    pub fn push_row(&mut self, values: &[Option<ScalarRef<'_>>]) -> Result<()> {
        ensure!(
            !self.is_full(),
            FullSnafu {
                capacity: self.capacity
            }
        );
        ensure!(
            values.len() == self.descriptor.num_slots(),
            ArityMismatchSnafu {
                expect: self.descriptor.num_slots(),
                found: values.len()
            }
        );
        for (index, (value, slot)) in values.iter().zip(self.descriptor.slots()).enumerate() {
            if let Some(value) = value {
                ensure!(
                    value.physical_type() == slot.physical_type(),
                    TypeMismatchSnafu {
                        index,
                        expect: slot.logical_type(),
                        found: value.physical_type()
                    }
                );
            }
        }

        let tuple = self
            .pool
            .allocate_tuple(&self.descriptor)
            .context(AllocateSnafu)?;
        for (value, slot) in values.iter().zip(self.descriptor.slots()) {
            // SAFETY: tuple is allocated with the descriptor in the pool, types are checked
            unsafe {
                tuple
                    .set(slot, *value, &self.pool)
                    .context(AllocateSnafu)?;
            }
        }
        self.tuples.push(tuple);
        Ok(())
    }

    /// Get the row with given index
    ///
    /// # Panics
    ///
    /// Panics if the index is out of range
    #[inline]
    pub fn row(&self, index: usize) -> TupleRef<'_> {
        // SAFETY: tuples are allocated in the pool of self, the borrow of self guarantees
        // that the pool is not reset
        unsafe { TupleRef::new(self.tuples[index], &self.descriptor) }
    }

    /// Iterate over the rows
    pub fn rows(&self) -> impl Iterator<Item = TupleRef<'_>> {
        (0..self.tuples.len()).map(|index| self.row(index))
    }

    /// Remove all of the rows and free the pool
    #[inline]
    pub fn reset(&mut self) {
        self.tuples.clear();
        self.pool.reset();
    }

    /// Format the batch with given table builder
    pub fn fmt_table(&self, table_builder: &mut TableBuilder, with_logical_type: bool) {
        if with_logical_type {
            table_builder.push_record(
                self.descriptor
                    .logical_types()
                    .map(|logical_type| format!("{:?}", logical_type)),
            );
        }

        self.rows().for_each(|row| {
            table_builder.push_record(row.values().map(|value| {
                value.map_or_else(|| "Null".to_string(), |value| value.to_string())
            }));
        });
    }
}

impl Display for RowBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table_builder = TableBuilder::default();
        self.fmt_table(&mut table_builder, true);
        write!(
            f,
            "{}",
            table_builder
                .build()
                .with(tabled::settings::style::Style::modern())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RowBatch {
        RowBatch::new(
            Arc::new(TupleDescriptor::new([
                LogicalType::Integer,
                LogicalType::VarChar,
            ])),
            3,
        )
    }

    #[test]
    fn test_display_row_batch() {
        let mut batch = batch();
        batch
            .push_row(&[Some(ScalarRef::Int32(10)), None])
            .unwrap();
        batch
            .push_row(&[None, Some(ScalarRef::String("curry"))])
            .unwrap();

        let expect = expect_test::expect![[r#"
            ┌─────────┬─────────┐
            │ Integer │ VarChar │
            ├─────────┼─────────┤
            │ 10      │ Null    │
            ├─────────┼─────────┤
            │ Null    │ curry   │
            └─────────┴─────────┘"#]];
        expect.assert_eq(&batch.to_string());
    }

    #[test]
    fn test_push_row_checks() {
        let mut batch = batch();
        let err = batch.push_row(&[None]).unwrap_err();
        assert!(matches!(
            err,
            RowBatchError::ArityMismatch {
                expect: 2,
                found: 1
            }
        ));
        let err = batch
            .push_row(&[Some(ScalarRef::Int64(1)), None])
            .unwrap_err();
        assert!(matches!(err, RowBatchError::TypeMismatch { index: 0, .. }));

        for _ in 0..3 {
            batch.push_row(&[None, None]).unwrap();
        }
        assert!(batch.is_full());
        let err = batch.push_row(&[None, None]).unwrap_err();
        assert!(matches!(err, RowBatchError::Full { capacity: 3 }));

        batch.reset();
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 3);
    }
}
