//! Scalar values stored in the slots of a tuple
//!
//! [`ScalarImpl`] owns its value, [`ScalarRef`] borrows the variable length data from a
//! pool or from a [`ScalarImpl`]. `None` represents the SQL `NULL` everywhere in this
//! crate, therefore the nullable scalar is `Option<ScalarRef<'a>>`

use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::hash::Hasher;

use crate::private::Sealed;
use crate::types::PhysicalType;

/// Owned scalar
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarImpl {
    /// Boolean
    Boolean(bool),
    /// i8
    Int8(i8),
    /// i16
    Int16(i16),
    /// i32
    Int32(i32),
    /// i64
    Int64(i64),
    /// f32
    Float32(f32),
    /// f64
    Float64(f64),
    /// Utf-8 string
    String(String),
    /// Binary
    Binary(Vec<u8>),
}

/// Reference to a scalar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarRef<'a> {
    /// Boolean
    Boolean(bool),
    /// i8
    Int8(i8),
    /// i16
    Int16(i16),
    /// i32
    Int32(i32),
    /// i64
    Int64(i64),
    /// f32
    Float32(f32),
    /// f64
    Float64(f64),
    /// Utf-8 string
    String(&'a str),
    /// Binary
    Binary(&'a [u8]),
}

impl ScalarImpl {
    /// Borrow the scalar
    #[inline]
    pub fn as_scalar_ref(&self) -> ScalarRef<'_> {
        match self {
            Self::Boolean(v) => ScalarRef::Boolean(*v),
            Self::Int8(v) => ScalarRef::Int8(*v),
            Self::Int16(v) => ScalarRef::Int16(*v),
            Self::Int32(v) => ScalarRef::Int32(*v),
            Self::Int64(v) => ScalarRef::Int64(*v),
            Self::Float32(v) => ScalarRef::Float32(*v),
            Self::Float64(v) => ScalarRef::Float64(*v),
            Self::String(v) => ScalarRef::String(v),
            Self::Binary(v) => ScalarRef::Binary(v),
        }
    }

    /// Physical type of the scalar
    #[inline]
    pub fn physical_type(&self) -> PhysicalType {
        self.as_scalar_ref().physical_type()
    }
}

impl<'a> ScalarRef<'a> {
    /// Physical type of the scalar
    #[inline]
    pub fn physical_type(&self) -> PhysicalType {
        match self {
            Self::Boolean(_) => PhysicalType::Boolean,
            Self::Int8(_) => PhysicalType::Int8,
            Self::Int16(_) => PhysicalType::Int16,
            Self::Int32(_) => PhysicalType::Int32,
            Self::Int64(_) => PhysicalType::Int64,
            Self::Float32(_) => PhysicalType::Float32,
            Self::Float64(_) => PhysicalType::Float64,
            Self::String(_) => PhysicalType::String,
            Self::Binary(_) => PhysicalType::Binary,
        }
    }

    /// Convert the reference to owned scalar
    pub fn to_owned_scalar(&self) -> ScalarImpl {
        match *self {
            Self::Boolean(v) => ScalarImpl::Boolean(v),
            Self::Int8(v) => ScalarImpl::Int8(v),
            Self::Int16(v) => ScalarImpl::Int16(v),
            Self::Int32(v) => ScalarImpl::Int32(v),
            Self::Int64(v) => ScalarImpl::Int64(v),
            Self::Float32(v) => ScalarImpl::Float32(v),
            Self::Float64(v) => ScalarImpl::Float64(v),
            Self::String(v) => ScalarImpl::String(v.to_owned()),
            Self::Binary(v) => ScalarImpl::Binary(v.to_vec()),
        }
    }

    /// Bytes of the variable length scalar, `None` for fixed length scalar
    #[inline]
    pub fn var_len_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Self::String(v) => Some(v.as_bytes()),
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Compare two scalars that have same physical type. Returns `None` if the physical
    /// types are different or one of the float is `NaN`
    #[inline]
    pub fn partial_cmp_same_type(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(l), Self::Boolean(r)) => l.partial_cmp(r),
            (Self::Int8(l), Self::Int8(r)) => l.partial_cmp(r),
            (Self::Int16(l), Self::Int16(r)) => l.partial_cmp(r),
            (Self::Int32(l), Self::Int32(r)) => l.partial_cmp(r),
            (Self::Int64(l), Self::Int64(r)) => l.partial_cmp(r),
            (Self::Float32(l), Self::Float32(r)) => l.partial_cmp(r),
            (Self::Float64(l), Self::Float64(r)) => l.partial_cmp(r),
            (Self::String(l), Self::String(r)) => l.partial_cmp(r),
            (Self::Binary(l), Self::Binary(r)) => l.partial_cmp(r),
            _ => None,
        }
    }
}

impl Display for ScalarRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int8(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{:?}", v),
            Self::Float64(v) => write!(f, "{:?}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Binary(v) => {
                write!(f, "0x")?;
                v.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
            }
        }
    }
}

impl Display for ScalarImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.as_scalar_ref(), f)
    }
}

/// Canonical bits of the f32 used in grouping: `-0.0` and `0.0` have the same bits,
/// all of the `NaN`s have the same bits
#[inline]
fn canonical_f32_bits(v: f32) -> u32 {
    if v == 0.0 {
        0
    } else if v.is_nan() {
        f32::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// Canonical bits of the f64 used in grouping, see [`canonical_f32_bits`]
#[inline]
fn canonical_f64_bits(v: f64) -> u64 {
    if v == 0.0 {
        0
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// Equality used by the grouping. Different from the SQL equality, `NULL` equals to
/// `NULL`, `-0.0` equals to `0.0` and `NaN` equals to `NaN`. Scalars with different
/// physical types are never equal
#[inline]
pub fn group_eq(lhs: Option<ScalarRef<'_>>, rhs: Option<ScalarRef<'_>>) -> bool {
    match (lhs, rhs) {
        (None, None) => true,
        (Some(l), Some(r)) => match (l, r) {
            (ScalarRef::Float32(l), ScalarRef::Float32(r)) => {
                canonical_f32_bits(l) == canonical_f32_bits(r)
            }
            (ScalarRef::Float64(l), ScalarRef::Float64(r)) => {
                canonical_f64_bits(l) == canonical_f64_bits(r)
            }
            (l, r) => l == r,
        },
        _ => false,
    }
}

/// Feed the scalar into the hasher. Scalars that are equal under [`group_eq`] always
/// produce the same hash
#[inline]
pub fn group_hash<H: Hasher>(value: Option<ScalarRef<'_>>, state: &mut H) {
    let Some(value) = value else {
        state.write_u8(u8::MAX);
        return;
    };
    state.write_u8(value.physical_type() as u8);
    match value {
        ScalarRef::Boolean(v) => state.write_u8(v as u8),
        ScalarRef::Int8(v) => state.write_i8(v),
        ScalarRef::Int16(v) => state.write_i16(v),
        ScalarRef::Int32(v) => state.write_i32(v),
        ScalarRef::Int64(v) => state.write_i64(v),
        ScalarRef::Float32(v) => state.write_u32(canonical_f32_bits(v)),
        ScalarRef::Float64(v) => state.write_u64(canonical_f64_bits(v)),
        ScalarRef::String(v) => {
            state.write_usize(v.len());
            state.write(v.as_bytes());
        }
        ScalarRef::Binary(v) => {
            state.write_usize(v.len());
            state.write(v);
        }
    }
}

/// Types whose values are stored inline in the slot. Reading/writing the slot is
/// reading/writing the plain Rust value at the offset of the slot
pub trait NativeType:
    Copy + PartialOrd + Debug + Default + Send + Sync + 'static + Sealed
{
    /// Physical type of the native type
    const PHYSICAL_TYPE: PhysicalType;

    /// Extract the native value from the scalar, returns `None` if the scalar has a
    /// different physical type
    fn from_scalar(scalar: ScalarRef<'_>) -> Option<Self>;

    /// Convert the native value to scalar
    fn into_scalar(self) -> ScalarRef<'static>;
}

macro_rules! impl_native_type {
    ($({$variant:ident, $ty:ty, $physical:ident}),*) => {
        $(
            impl Sealed for $ty {}

            impl NativeType for $ty {
                const PHYSICAL_TYPE: PhysicalType = PhysicalType::$physical;

                #[inline]
                fn from_scalar(scalar: ScalarRef<'_>) -> Option<Self> {
                    if let ScalarRef::$variant(v) = scalar {
                        Some(v)
                    } else {
                        None
                    }
                }

                #[inline]
                fn into_scalar(self) -> ScalarRef<'static> {
                    ScalarRef::$variant(self)
                }
            }
        )*
    };
}

crate::for_all_native_types!(impl_native_type);

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasher, RandomState};

    #[test]
    fn test_group_eq_with_null_and_floats() {
        assert!(group_eq(None, None));
        assert!(!group_eq(None, Some(ScalarRef::Int32(0))));
        assert!(group_eq(
            Some(ScalarRef::Float64(-0.0)),
            Some(ScalarRef::Float64(0.0))
        ));
        assert!(group_eq(
            Some(ScalarRef::Float32(f32::NAN)),
            Some(ScalarRef::Float32(-f32::NAN))
        ));
        assert!(!group_eq(
            Some(ScalarRef::Int32(1)),
            Some(ScalarRef::Int64(1))
        ));
    }

    #[test]
    fn test_group_hash_consistent_with_eq() {
        let state = RandomState::new();
        let hash = |value: Option<ScalarRef<'_>>| {
            let mut hasher = state.build_hasher();
            group_hash(value, &mut hasher);
            hasher.finish()
        };
        assert_eq!(
            hash(Some(ScalarRef::Float64(-0.0))),
            hash(Some(ScalarRef::Float64(0.0)))
        );
        assert_eq!(
            hash(Some(ScalarRef::Float64(f64::NAN))),
            hash(Some(ScalarRef::Float64(-f64::NAN)))
        );
        assert_eq!(
            hash(Some(ScalarRef::String("curry"))),
            hash(Some(ScalarImpl::String("curry".to_string()).as_scalar_ref()))
        );
        assert_ne!(hash(None), hash(Some(ScalarRef::Int8(0))));
    }

    #[test]
    fn test_display_scalar() {
        assert_eq!(ScalarRef::Float32(3.0).to_string(), "3.0");
        assert_eq!(ScalarRef::Binary(&[0, 255]).to_string(), "0x00ff");
        assert_eq!(ScalarImpl::String("ab".to_string()).to_string(), "ab");
        // Owned scalars display like the borrowed ones, not like their debug form
        let binary = ScalarImpl::Binary(vec![0, 255]);
        assert_eq!(binary.to_string(), "0x00ff");
        assert_eq!(ScalarImpl::Float64(3.0).to_string(), "3.0");
    }

    #[test]
    fn test_native_type() {
        assert_eq!(i32::from_scalar(ScalarRef::Int32(7)), Some(7));
        assert_eq!(i32::from_scalar(ScalarRef::Int64(7)), None);
        assert_eq!(2.5f64.into_scalar(), ScalarRef::Float64(2.5));
    }
}
