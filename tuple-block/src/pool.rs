//! Bump arena that owns the tuples and the variable length data referenced by them.
//!
//! The pool never frees an individual allocation, [`MemPool::reset`] frees everything in
//! bulk. An optional limit bounds the bytes the arena may request from the system, an
//! allocation exceeding it fails with [`PoolError`] instead of aborting the process

use std::alloc::Layout;
use std::ptr::NonNull;

use bumpalo::Bump;
use snafu::Snafu;

use crate::tuple::{TupleDescriptor, TuplePtr};

/// Error returned when the pool can not satisfy the allocation
#[derive(Debug, Snafu)]
#[snafu(display(
    "MemPool failed to allocate `{size}` bytes. `{allocated}` bytes have been allocated, the limit is `{limit:?}`"
))]
pub struct PoolError {
    size: usize,
    allocated: usize,
    limit: Option<usize>,
}

type Result<T> = std::result::Result<T, PoolError>;

/// Bump arena backed memory pool
#[derive(Debug, Default)]
pub struct MemPool {
    arena: Bump,
}

impl MemPool {
    /// Create a new pool without memory limit
    pub fn new() -> Self {
        Self { arena: Bump::new() }
    }

    /// Create a new pool that can allocate at most `limit` bytes from the system. `None`
    /// means unlimited
    pub fn with_limit(limit: Option<usize>) -> Self {
        let arena = Bump::new();
        arena.set_allocation_limit(limit);
        Self { arena }
    }

    /// Memory limit of the pool
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.arena.allocation_limit()
    }

    /// Allocate a region with the given layout. The region is valid until the pool is
    /// reset or dropped. Content of the region is uninitialized
    #[inline]
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        self.arena.try_alloc_layout(layout).map_err(|_| PoolError {
            size: layout.size(),
            allocated: self.allocated_bytes(),
            limit: self.limit(),
        })
    }

    /// Copy the bytes into the pool, returns the pointer to the copied bytes
    #[inline]
    pub fn copy_bytes(&self, bytes: &[u8]) -> Result<NonNull<u8>> {
        if bytes.is_empty() {
            return Ok(NonNull::dangling());
        }
        let ptr = self.allocate(Layout::for_value(bytes))?;
        // SAFETY: ptr is freshly allocated with the layout of bytes, they do not overlap
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        Ok(ptr)
    }

    /// Allocate a tuple with the layout described by the descriptor. All of the slots are
    /// zeroed and non-null
    pub fn allocate_tuple(&self, descriptor: &TupleDescriptor) -> Result<TuplePtr> {
        let layout = descriptor.layout();
        if layout.size() == 0 {
            return Ok(TuplePtr::dangling());
        }
        let ptr = self.allocate(layout)?;
        // SAFETY: ptr is freshly allocated with layout.size() bytes
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size());
            Ok(TuplePtr::new(ptr))
        }
    }

    /// Number of bytes the pool has requested from the system
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    /// Free all of the allocations in bulk. Requires `&mut self`, all of the
    /// [`TupleRef`]s borrowed from the owner of the pool are dead
    ///
    /// [`TupleRef`]: crate::tuple::TupleRef
    #[inline]
    pub fn reset(&mut self) {
        self.arena.reset();
    }
}
