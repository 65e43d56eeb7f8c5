//! # TupleBlock
//!
//! `TupleBlock` is the row oriented storage used by the `hashagg` engine. A tuple is a
//! fixed layout record described by a [`TupleDescriptor`]: the null indicator bytes come
//! first, then every slot aligned to its natural alignment. Variable length values are
//! stored as `(ptr, len)` views into a [`MemPool`], the bump arena that owns them.
//!
//! Tuples are referenced through [`TuplePtr`], a non-owning handle. Reading or writing
//! through it is unsafe, the caller guarantees that the pool backing the tuple is alive.
//! [`TupleRef`] is the safe view, it borrows the owner of the pool such that the borrow
//! checker forbids retaining it across a reset.
//!
//! [`TupleDescriptor`]: crate::tuple::TupleDescriptor
//! [`MemPool`]: crate::pool::MemPool
//! [`TuplePtr`]: crate::tuple::TuplePtr
//! [`TupleRef`]: crate::tuple::TupleRef

pub mod batch;
mod macros;
pub mod pool;
pub mod scalar;
pub mod tuple;
pub mod types;
pub mod utils;

mod private {
    /// Sealed trait protect against downstream implementations
    pub trait Sealed {}
}
