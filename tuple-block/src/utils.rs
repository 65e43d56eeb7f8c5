//! Utils for memory computation

/// Computing the smallest value that is multiple of align and greater than
/// or equal to size.
///
/// Note that `align` is the alignment, therefore, it must be power of two.
/// Otherwise, the returned value is incorrect!
#[inline]
pub fn next_multiple_of_align(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    (size + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_multiple_of_align() {
        assert_eq!(next_multiple_of_align(0, 8), 0);
        assert_eq!(next_multiple_of_align(1, 8), 8);
        assert_eq!(next_multiple_of_align(8, 8), 8);
        assert_eq!(next_multiple_of_align(9, 4), 12);
        assert_eq!(next_multiple_of_align(3, 1), 3);
    }
}
