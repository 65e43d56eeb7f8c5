//! Logical and physical types of the slots in the tuple
//!
//! [`LogicalType`] is what the user sees. Each logical type is mapped to exactly one
//! [`PhysicalType`], the physical type determines the memory representation of the slot.
//! Multiple logical types may share the same physical type, for example `Date` is stored
//! as `Int32` and `Timestamp` is stored as `Int64`

use std::alloc::Layout;
use std::fmt::Display;

use crate::tuple::StringSlot;

/// Physical type determines the memory representation of a slot in the tuple
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    /// Boolean, stored as a single byte that is either 0 or 1
    Boolean,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float number
    Float32,
    /// 64-bit float number
    Float64,
    /// Variable length Utf-8 String, the slot stores a view into the pool
    String,
    /// Variable length binary, the slot stores a view into the pool
    Binary,
}

impl PhysicalType {
    /// Layout of the slot that stores the value of this type
    #[inline]
    pub const fn slot_layout(self) -> Layout {
        match self {
            Self::Boolean | Self::Int8 => Layout::new::<u8>(),
            Self::Int16 => Layout::new::<i16>(),
            Self::Int32 => Layout::new::<i32>(),
            Self::Int64 => Layout::new::<i64>(),
            Self::Float32 => Layout::new::<f32>(),
            Self::Float64 => Layout::new::<f64>(),
            Self::String | Self::Binary => Layout::new::<StringSlot>(),
        }
    }

    /// Returns true if the value of the slot lives in the pool instead of the tuple
    #[inline]
    pub const fn is_var_len(self) -> bool {
        matches!(self, Self::String | Self::Binary)
    }
}

/// Logical type of the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// Boolean
    Boolean,
    /// Signed 8-bit integer
    TinyInt,
    /// Signed 16-bit integer
    SmallInt,
    /// Signed 32-bit integer
    Integer,
    /// Signed 64-bit integer
    BigInt,
    /// 32-bit float number
    Float,
    /// 64-bit float number
    Double,
    /// Days since the unix epoch
    Date,
    /// Microseconds since the unix epoch
    Timestamp,
    /// Variable length Utf-8 string
    VarChar,
    /// Variable length binary
    VarBinary,
}

impl LogicalType {
    /// Get the physical type of the logical type
    #[inline]
    pub const fn physical_type(self) -> PhysicalType {
        match self {
            Self::Boolean => PhysicalType::Boolean,
            Self::TinyInt => PhysicalType::Int8,
            Self::SmallInt => PhysicalType::Int16,
            Self::Integer | Self::Date => PhysicalType::Int32,
            Self::BigInt | Self::Timestamp => PhysicalType::Int64,
            Self::Float => PhysicalType::Float32,
            Self::Double => PhysicalType::Float64,
            Self::VarChar => PhysicalType::String,
            Self::VarBinary => PhysicalType::Binary,
        }
    }

    /// Returns true if the type is a signed integer type that supports arithmetic.
    /// `Date` and `Timestamp` are stored as integers but they are not integers
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt
        )
    }

    /// Returns true if the type is a float type
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Returns true if the type is numeric
    #[inline]
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
