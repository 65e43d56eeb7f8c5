//! Utils for hash

use std::hash::{BuildHasher, Hasher};

use tuple_block::scalar::{group_hash, ScalarRef};

/// Hash value of the group by keys
pub type HashValue = u64;

/// Default hash builder
pub type BuildHasherDefault = ahash::RandomState;

/// Constant build hasher default. Fixed seeds, the same keys always have the same hash
/// value across operators
pub const BUILD_HASHER_DEFAULT: BuildHasherDefault = BuildHasherDefault::with_seeds(9, 7, 9, 8);

/// Hash the group by values of a row. `NULL`s participate in the hash, values that are
/// equal under [`group_eq`](tuple_block::scalar::group_eq) have the same hash value
#[inline]
pub fn hash_group_by_values(values: &[Option<ScalarRef<'_>>]) -> HashValue {
    let mut hasher = BUILD_HASHER_DEFAULT.build_hasher();
    values
        .iter()
        .for_each(|value| group_hash(*value, &mut hasher));
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_group_by_values() {
        let lhs = hash_group_by_values(&[None, Some(ScalarRef::Float64(0.0))]);
        let rhs = hash_group_by_values(&[None, Some(ScalarRef::Float64(-0.0))]);
        assert_eq!(lhs, rhs);

        // NULL is part of the key: (NULL, 1) and (1, NULL) are different groups
        let lhs = hash_group_by_values(&[None, Some(ScalarRef::Int32(1))]);
        let rhs = hash_group_by_values(&[Some(ScalarRef::Int32(1)), None]);
        assert_ne!(lhs, rhs);
    }
}
