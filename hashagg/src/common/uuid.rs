//! uuids in the crate.

use std::fmt::Display;

use uuid::Uuid;

macro_rules! make_id {
    ($name:ident, $comment:expr) => {
        #[doc = $comment]
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl $name {
            /// Construct Self from u128
            #[inline]
            pub const fn from_u128(val: u128) -> Self {
                Self(Uuid::from_u128(val))
            }

            /// Generate a random id
            #[inline]
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

make_id!(QueryId, "[`QueryId`] is the unique identifier of the query");
