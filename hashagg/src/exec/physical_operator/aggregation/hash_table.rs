//! HashTable for hash aggregation

use hashbrown::hash_table::{HashTable as SwissTable, IntoIter as SwissTableIntoIter};
use snafu::Snafu;
use tuple_block::tuple::TuplePtr;

use crate::common::utils::hash::HashValue;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum HashTableError {
    #[snafu(display(
        "Failed to grow the hash table that contains `{len}` groups, out of memory"
    ))]
    Reserve { len: usize },
}

/// Element of the hash table
#[derive(Debug, Clone, Copy)]
struct Element {
    /// Hash value of the group by keys. It is used to avoid rehashing the keys when we
    /// need to resize the hash table
    hash_value: HashValue,
    /// The intermediate tuple, its leading slots are the group by keys. It is allocated
    /// in the pool of the operator, growing the table never moves it
    tuple: TuplePtr,
}

/// HashTable that maps the group by keys to the intermediate tuple. It is not
/// self-contained: the keys are stored in the tuples, caller provides the equality
/// function that compares the keys with the tuple
#[derive(Debug, Default)]
pub struct HashTable {
    swiss_table: SwissTable<Element>,
}

impl HashTable {
    /// Create a new hash table
    #[inline]
    pub fn new() -> Self {
        Self {
            swiss_table: SwissTable::new(),
        }
    }

    /// Returns the number of groups in the table
    #[inline]
    pub fn len(&self) -> usize {
        self.swiss_table.len()
    }

    /// Returns true if the hash table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.swiss_table.is_empty()
    }

    /// Number of buckets allocated by the table. The swiss table keeps 1/8 of the buckets
    /// empty when it has at least 8 buckets, the number is computed from its capacity
    pub fn num_buckets(&self) -> usize {
        let capacity = self.swiss_table.capacity();
        match capacity {
            0 => 0,
            capacity if capacity < 8 => capacity + 1,
            capacity => capacity / 7 * 8,
        }
    }

    /// Ratio between the number of groups and the [`num_buckets`](Self::num_buckets)
    pub fn load_factor(&self) -> f64 {
        match self.num_buckets() {
            0 => 0.0,
            num_buckets => self.len() as f64 / num_buckets as f64,
        }
    }

    /// Find the tuple of the group, construct and insert it if the group does not exist.
    /// Returns the tuple and whether it is inserted by this call.
    ///
    /// `eq` compares the keys of the probing row with the keys stored in the tuple.
    /// Nothing is inserted if `construct` fails
    #[inline]
    pub(super) fn find_or_insert_with<E>(
        &mut self,
        hash_value: HashValue,
        mut eq: impl FnMut(TuplePtr) -> bool,
        construct: impl FnOnce() -> Result<TuplePtr, E>,
    ) -> Result<(TuplePtr, bool), E>
    where
        E: From<HashTableError>,
    {
        if let Some(element) = self
            .swiss_table
            .find(hash_value, |element| eq(element.tuple))
        {
            return Ok((element.tuple, false));
        }

        // Grow the table before constructing the tuple, such that the insertion below
        // never allocates
        if self
            .swiss_table
            .try_reserve(1, |element| element.hash_value)
            .is_err()
        {
            return Err(HashTableError::Reserve { len: self.len() }.into());
        }

        let tuple = construct()?;
        self.swiss_table
            .insert_unique(hash_value, Element { hash_value, tuple }, |element| {
                element.hash_value
            });
        Ok((tuple, true))
    }

    /// Remove all of the groups, keep the allocated memory
    #[inline]
    pub fn clear(&mut self) {
        self.swiss_table.clear()
    }
}

impl IntoIterator for HashTable {
    type Item = TuplePtr;
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter(self.swiss_table.into_iter())
    }
}

/// Iterator that visits the tuple of each group exactly once, in arbitrary order
pub struct IntoIter(SwissTableIntoIter<Element>);

impl std::fmt::Debug for IntoIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IntoIter {{ remaining: {} }}", self.0.len())
    }
}

impl Iterator for IntoIter {
    type Item = TuplePtr;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|element| element.tuple)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuple_block::pool::MemPool;
    use tuple_block::tuple::TupleDescriptor;
    use tuple_block::types::LogicalType;

    #[derive(Debug)]
    enum TestError {
        HashTable,
        Construct,
    }

    impl From<HashTableError> for TestError {
        fn from(_: HashTableError) -> Self {
            Self::HashTable
        }
    }

    #[test]
    fn test_find_or_insert() {
        let pool = MemPool::new();
        let descriptor = TupleDescriptor::new([LogicalType::BigInt]);
        let slot = &descriptor.slots()[0];
        let mut table = HashTable::new();
        assert_eq!(table.num_buckets(), 0);
        assert_eq!(table.load_factor(), 0.0);

        let lookup = |table: &mut HashTable, key: i64| {
            table
                .find_or_insert_with::<TestError>(
                    // Collide on purpose, equality decides the group
                    (key % 2) as HashValue,
                    |tuple| unsafe { tuple.read_native::<i64>(slot) == key },
                    || {
                        let tuple = pool.allocate_tuple(&descriptor).unwrap();
                        unsafe { tuple.write_native(slot, key) };
                        Ok(tuple)
                    },
                )
                .unwrap()
        };

        let (first, inserted) = lookup(&mut table, 1);
        assert!(inserted);
        assert!(lookup(&mut table, 3).1);
        let (again, inserted) = lookup(&mut table, 1);
        assert!(!inserted);
        assert_eq!(first, again);
        lookup(&mut table, 2);
        assert_eq!(table.len(), 3);
        assert!(table.num_buckets() >= 4);
        // Load factor agrees with the reported buckets
        assert_eq!(table.load_factor(), 3.0 / table.num_buckets() as f64);
        assert!(table.load_factor() <= 1.0);

        let mut keys = table
            .into_iter()
            .map(|tuple| unsafe { tuple.read_native::<i64>(slot) })
            .collect::<Vec<_>>();
        keys.sort_unstable();
        assert_eq!(keys, [1, 2, 3]);
    }

    #[test]
    fn test_failed_construct_inserts_nothing() {
        let mut table = HashTable::new();
        let err = table
            .find_or_insert_with(7, |_| true, || Err(TestError::Construct))
            .unwrap_err();
        assert!(matches!(err, TestError::Construct));
        assert!(table.is_empty());
    }
}
