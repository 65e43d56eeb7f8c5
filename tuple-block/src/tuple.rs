//! Fixed layout tuples
//!
//! Layout of a tuple described by [`TupleDescriptor`]:
//!
//! ```text
//! ┌──────────────────────┬─────────┬─────────┬─────┬─────────┐
//! │ null indicator bytes │ slot 0  │ slot 1  │ ... │ slot N  │
//! └──────────────────────┴─────────┴─────────┴─────┴─────────┘
//! ```
//!
//! Each slot owns a bit in the null indicator bytes, the bit is set if the slot is
//! `NULL`. Slots are aligned to the natural alignment of their physical type. A tuple
//! without slot has zero width, it never touches memory.

use std::alloc::Layout;
use std::fmt::{Debug, Display};
use std::ptr::NonNull;

use crate::pool::{MemPool, PoolError};
use crate::scalar::{NativeType, ScalarImpl, ScalarRef};
use crate::types::{LogicalType, PhysicalType};
use crate::utils::next_multiple_of_align;

/// Slot that stores the variable length value. The bytes live in a [`MemPool`]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StringSlot {
    ptr: *const u8,
    len: usize,
}

impl StringSlot {
    /// # Safety
    ///
    /// The pool that owns the bytes must outlive `'a`
    #[inline]
    unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

/// Describes a slot in the tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotDescriptor {
    logical_type: LogicalType,
    offset: usize,
    null_byte: usize,
    null_mask: u8,
}

impl SlotDescriptor {
    /// Logical type of the slot
    #[inline]
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Physical type of the slot
    #[inline]
    pub fn physical_type(&self) -> PhysicalType {
        self.logical_type.physical_type()
    }

    /// Byte offset of the slot from the start of the tuple
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Describes the layout of the tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDescriptor {
    slots: Vec<SlotDescriptor>,
    layout: Layout,
}

impl TupleDescriptor {
    /// Create a descriptor with the given slot types, in order
    pub fn new(logical_types: impl IntoIterator<Item = LogicalType>) -> Self {
        let logical_types = logical_types.into_iter().collect::<Vec<_>>();
        if logical_types.is_empty() {
            return Self {
                slots: Vec::new(),
                layout: Layout::new::<()>(),
            };
        }

        let mut size = logical_types.len().div_ceil(8);
        let mut align = 1;
        let slots = logical_types
            .into_iter()
            .enumerate()
            .map(|(index, logical_type)| {
                let slot_layout = logical_type.physical_type().slot_layout();
                let offset = next_multiple_of_align(size, slot_layout.align());
                size = offset + slot_layout.size();
                align = align.max(slot_layout.align());
                SlotDescriptor {
                    logical_type,
                    offset,
                    null_byte: index / 8,
                    null_mask: 1 << (index % 8),
                }
            })
            .collect::<Vec<_>>();

        // SAFETY: align is the alignment of a primitive type, it is power of two. The size
        // is the sum of a few slots, it can not overflow isize
        let layout = unsafe {
            Layout::from_size_align_unchecked(next_multiple_of_align(size, align), align)
        };

        Self { slots, layout }
    }

    /// Slots of the tuple
    #[inline]
    pub fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    /// Number of slots
    #[inline]
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Memory layout of the tuple
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns true if the tuple has no slot
    #[inline]
    pub fn is_zero_width(&self) -> bool {
        self.slots.is_empty()
    }

    /// Logical types of the slots
    pub fn logical_types(&self) -> impl Iterator<Item = LogicalType> + '_ {
        self.slots.iter().map(|slot| slot.logical_type)
    }
}

impl Display for TupleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        let mut iter = self.slots.iter();
        if let Some(slot) = iter.next() {
            write!(f, "{}", slot.logical_type)?;
            iter.try_for_each(|slot| write!(f, ", {}", slot.logical_type))?;
        }
        write!(f, ")")
    }
}

/// Non-owning handle of a tuple allocated in a [`MemPool`].
///
/// All of the accessors are unsafe: caller should guarantee the pool that owns the tuple
/// is alive, the slot passed in belongs to the descriptor the tuple is allocated with
/// and no one else is accessing the tuple concurrently
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuplePtr(NonNull<u8>);

// SAFETY: TuplePtr is an address. Dereferencing it is unsafe, the caller upholds the
// synchronization requirements at the dereference site
unsafe impl Send for TuplePtr {}
unsafe impl Sync for TuplePtr {}

impl TuplePtr {
    /// Pointer for the zero width tuple
    #[inline]
    pub const fn dangling() -> Self {
        Self(NonNull::dangling())
    }

    /// Create a handle from the pointer to the start of the tuple
    #[inline]
    pub const fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// Raw pointer to the start of the tuple
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Returns true if the slot is `NULL`
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]
    #[inline]
    pub unsafe fn is_null(self, slot: &SlotDescriptor) -> bool {
        unsafe { *self.as_ptr().add(slot.null_byte) & slot.null_mask != 0 }
    }

    /// Mark the slot as `NULL`
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]
    #[inline]
    pub unsafe fn set_null(self, slot: &SlotDescriptor) {
        unsafe { *self.as_ptr().add(slot.null_byte) |= slot.null_mask }
    }

    /// Mark the slot as non-null
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]
    #[inline]
    pub unsafe fn set_not_null(self, slot: &SlotDescriptor) {
        unsafe { *self.as_ptr().add(slot.null_byte) &= !slot.null_mask }
    }

    /// Read the native value stored in the slot, ignoring the null indicator
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]. In addition, physical type of the slot must be `T::PHYSICAL_TYPE`
    #[inline]
    pub unsafe fn read_native<T: NativeType>(self, slot: &SlotDescriptor) -> T {
        debug_assert_eq!(slot.physical_type(), T::PHYSICAL_TYPE);
        unsafe { self.as_ptr().add(slot.offset).cast::<T>().read() }
    }

    /// Write the native value into the slot and mark it as non-null
    ///
    /// # Safety
    ///
    /// See [`TuplePtr::read_native`]
    #[inline]
    pub unsafe fn write_native<T: NativeType>(self, slot: &SlotDescriptor, value: T) {
        debug_assert_eq!(slot.physical_type(), T::PHYSICAL_TYPE);
        unsafe {
            self.as_ptr().add(slot.offset).cast::<T>().write(value);
            self.set_not_null(slot);
        }
    }

    /// Get the mutable bytes referenced by the variable length slot. Used by the
    /// accumulators that update their state in place
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]. In addition, the slot must be a non-null variable length slot
    /// whose bytes are owned by a pool that outlives `'a` and no one else references
    /// these bytes
    #[inline]
    pub unsafe fn var_len_mut<'a>(self, slot: &SlotDescriptor) -> &'a mut [u8] {
        debug_assert!(slot.physical_type().is_var_len());
        unsafe {
            let string_slot = self.as_ptr().add(slot.offset).cast::<StringSlot>().read();
            if string_slot.len == 0 {
                &mut []
            } else {
                std::slice::from_raw_parts_mut(string_slot.ptr as *mut u8, string_slot.len)
            }
        }
    }

    /// Get the value of the slot
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]. In addition, the pool that owns the tuple and its variable
    /// length data must outlive `'a`
    #[inline]
    pub unsafe fn get<'a>(self, slot: &SlotDescriptor) -> Option<ScalarRef<'a>> {
        unsafe {
            if self.is_null(slot) {
                return None;
            }
            let ptr = self.as_ptr().add(slot.offset);
            let scalar = match slot.physical_type() {
                PhysicalType::Boolean => ScalarRef::Boolean(ptr.read() != 0),
                PhysicalType::Int8 => ScalarRef::Int8(ptr.cast::<i8>().read()),
                PhysicalType::Int16 => ScalarRef::Int16(ptr.cast::<i16>().read()),
                PhysicalType::Int32 => ScalarRef::Int32(ptr.cast::<i32>().read()),
                PhysicalType::Int64 => ScalarRef::Int64(ptr.cast::<i64>().read()),
                PhysicalType::Float32 => ScalarRef::Float32(ptr.cast::<f32>().read()),
                PhysicalType::Float64 => ScalarRef::Float64(ptr.cast::<f64>().read()),
                // Strings are only written from `&str`, they are valid utf-8
                PhysicalType::String => ScalarRef::String(std::str::from_utf8_unchecked(
                    ptr.cast::<StringSlot>().read().as_bytes(),
                )),
                PhysicalType::Binary => {
                    ScalarRef::Binary(ptr.cast::<StringSlot>().read().as_bytes())
                }
            };
            Some(scalar)
        }
    }

    /// Set the value of the slot. Variable length value is deep copied into the `pool`
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]. In addition, the physical type of the value must be the physical
    /// type of the slot and the `pool` must outlive the tuple
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the physical type of the value does not match the slot
    #[inline]
    pub unsafe fn set(
        self,
        slot: &SlotDescriptor,
        value: Option<ScalarRef<'_>>,
        pool: &MemPool,
    ) -> Result<(), PoolError> {
        let Some(value) = value else {
            unsafe { self.set_null(slot) };
            return Ok(());
        };
        debug_assert_eq!(value.physical_type(), slot.physical_type());

        unsafe {
            let ptr = self.as_ptr().add(slot.offset);
            match value {
                ScalarRef::Boolean(v) => ptr.write(v as u8),
                ScalarRef::Int8(v) => ptr.cast::<i8>().write(v),
                ScalarRef::Int16(v) => ptr.cast::<i16>().write(v),
                ScalarRef::Int32(v) => ptr.cast::<i32>().write(v),
                ScalarRef::Int64(v) => ptr.cast::<i64>().write(v),
                ScalarRef::Float32(v) => ptr.cast::<f32>().write(v),
                ScalarRef::Float64(v) => ptr.cast::<f64>().write(v),
                ScalarRef::String(v) => Self::write_var_len(ptr, v.as_bytes(), pool)?,
                ScalarRef::Binary(v) => Self::write_var_len(ptr, v, pool)?,
            }
            self.set_not_null(slot);
        }
        Ok(())
    }

    #[inline]
    unsafe fn write_var_len(ptr: *mut u8, bytes: &[u8], pool: &MemPool) -> Result<(), PoolError> {
        let copied = pool.copy_bytes(bytes)?;
        unsafe {
            ptr.cast::<StringSlot>().write(StringSlot {
                ptr: copied.as_ptr(),
                len: bytes.len(),
            })
        };
        Ok(())
    }

    /// Copy the value in `src_slot` of self to the `dst_slot` of `dst`. Variable length
    /// data is deep copied into `pool`. Copying a slot onto itself is a no-op
    ///
    /// # Safety
    ///
    /// See [`TuplePtr::set`]. In addition, both slots must have the same physical type
    #[inline]
    pub unsafe fn copy_slot_to(
        self,
        src_slot: &SlotDescriptor,
        dst: TuplePtr,
        dst_slot: &SlotDescriptor,
        pool: &MemPool,
    ) -> Result<(), PoolError> {
        if self == dst && src_slot == dst_slot {
            return Ok(());
        }
        unsafe { dst.set(dst_slot, self.get(src_slot), pool) }
    }

    /// Copy the whole tuple into `pool`, including its variable length data
    ///
    /// # Safety
    ///
    /// See [`TuplePtr`]. In addition, self must be allocated with the `descriptor`
    pub unsafe fn deep_copy(
        self,
        descriptor: &TupleDescriptor,
        pool: &MemPool,
    ) -> Result<TuplePtr, PoolError> {
        let layout = descriptor.layout();
        if layout.size() == 0 {
            return Ok(TuplePtr::dangling());
        }
        let dst = TuplePtr::new(pool.allocate(layout)?);
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr(), dst.as_ptr(), layout.size());
            for slot in descriptor
                .slots()
                .iter()
                .filter(|slot| slot.physical_type().is_var_len())
            {
                if !self.is_null(slot) {
                    let bytes = self
                        .as_ptr()
                        .add(slot.offset)
                        .cast::<StringSlot>()
                        .read()
                        .as_bytes();
                    Self::write_var_len(dst.as_ptr().add(slot.offset), bytes, pool)?;
                }
            }
        }
        Ok(dst)
    }
}

/// Safe view of a tuple. It borrows the owner of the pool, the tuple can not be
/// accessed after the pool is reset or dropped
#[derive(Clone, Copy)]
pub struct TupleRef<'a> {
    ptr: TuplePtr,
    descriptor: &'a TupleDescriptor,
}

impl<'a> TupleRef<'a> {
    /// Create a view of the tuple
    ///
    /// # Safety
    ///
    /// The tuple must be allocated with `descriptor` in a pool that outlives `'a`, and
    /// nobody mutates the tuple during `'a`
    #[inline]
    pub unsafe fn new(ptr: TuplePtr, descriptor: &'a TupleDescriptor) -> Self {
        Self { ptr, descriptor }
    }

    /// Descriptor of the tuple
    #[inline]
    pub fn descriptor(&self) -> &'a TupleDescriptor {
        self.descriptor
    }

    /// Pointer to the tuple
    #[inline]
    pub fn ptr(&self) -> TuplePtr {
        self.ptr
    }

    /// Number of slots in the tuple
    #[inline]
    pub fn num_slots(&self) -> usize {
        self.descriptor.num_slots()
    }

    /// Get the value of the slot with given index
    ///
    /// # Panics
    ///
    /// Panics if the index is out of range
    #[inline]
    pub fn get(&self, index: usize) -> Option<ScalarRef<'a>> {
        let slot = &self.descriptor.slots()[index];
        // SAFETY: guaranteed by the constructor
        unsafe { self.ptr.get(slot) }
    }

    /// Iterate over the values of the tuple
    pub fn values(self) -> impl Iterator<Item = Option<ScalarRef<'a>>> {
        let ptr = self.ptr;
        self.descriptor
            .slots()
            .iter()
            // SAFETY: guaranteed by the constructor
            .map(move |slot| unsafe { ptr.get(slot) })
    }

    /// Copy the values of the tuple into owned scalars
    pub fn to_owned_values(&self) -> Vec<Option<ScalarImpl>> {
        self.values()
            .map(|value| value.map(|v| v.to_owned_scalar()))
            .collect()
    }
}

impl Debug for TupleRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.values()).finish()
    }
}

impl Display for TupleRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.values().try_for_each(|value| match value {
            Some(value) => write!(f, "{},", value),
            None => write!(f, "Null,"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_layout() {
        let descriptor = TupleDescriptor::new([
            LogicalType::Boolean,
            LogicalType::BigInt,
            LogicalType::SmallInt,
            LogicalType::VarChar,
        ]);
        let offsets = descriptor
            .slots()
            .iter()
            .map(|slot| slot.offset())
            .collect::<Vec<_>>();
        // 1 null byte, bool at 1, i64 at 8, i16 at 16, string slot at 24
        assert_eq!(offsets, [1, 8, 16, 24]);
        assert_eq!(descriptor.layout().size(), 40);
        assert_eq!(descriptor.layout().align(), 8);
        assert_eq!(descriptor.to_string(), "(Boolean, BigInt, SmallInt, VarChar)");
    }

    #[test]
    fn test_zero_width_descriptor() {
        let descriptor = TupleDescriptor::new([]);
        assert!(descriptor.is_zero_width());
        assert_eq!(descriptor.layout().size(), 0);
    }

    #[test]
    fn test_null_bits_of_many_slots() {
        let pool = MemPool::new();
        let descriptor = TupleDescriptor::new([LogicalType::TinyInt; 10]);
        let tuple = pool.allocate_tuple(&descriptor).unwrap();
        unsafe {
            tuple.set_null(&descriptor.slots()[9]);
            assert!(tuple.is_null(&descriptor.slots()[9]));
            assert!(!tuple.is_null(&descriptor.slots()[1]));
            tuple.write_native(&descriptor.slots()[9], -3i8);
            assert_eq!(tuple.get(&descriptor.slots()[9]), Some(ScalarRef::Int8(-3)));
        }
    }

    #[test]
    fn test_deep_copy_owns_var_len_data() {
        let descriptor = TupleDescriptor::new([LogicalType::VarChar, LogicalType::Double]);
        let dst_pool = MemPool::new();
        let copied = {
            let mut src_pool = MemPool::new();
            let tuple = src_pool.allocate_tuple(&descriptor).unwrap();
            let copied = unsafe {
                tuple
                    .set(&descriptor.slots()[0], Some(ScalarRef::String("curry")), &src_pool)
                    .unwrap();
                tuple.set_null(&descriptor.slots()[1]);
                tuple.deep_copy(&descriptor, &dst_pool).unwrap()
            };
            src_pool.reset();
            copied
        };
        let tuple = unsafe { TupleRef::new(copied, &descriptor) };
        assert_eq!(tuple.to_string(), "curry,Null,");
    }
}
