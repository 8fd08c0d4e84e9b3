use num::PrimInt;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{Debug, Display};
use trait_set::trait_set;

// Until `trait_alias` is stabilized, we have to use a macro
trait_set! {
    /// General key type: a thread-safe, serializable unsigned integer of fixed width
    pub trait Key = PrimInt
        + FixedWidth
        + Serialize
        + DeserializeOwned
        + Debug
        + Display
        + Default
        + Send
        + Sync
        + 'static;
}

/// Width-dependent operations on keys.
pub trait FixedWidth: Copy {
    /// Number of bits in the key
    const BITS: u32;

    /// Size of an encoded key in bytes
    const BYTES: usize;

    /// The key as a double, rounding to the nearest representable value.
    fn as_f64(self) -> f64;

    /// The top `bits` bits of the key, which select its bucket. Zero bits select bucket 0.
    fn prefix(self, bits: u32) -> usize;
}

macro_rules! impl_fixed_width {
    ($($t:ty),+) => {
        $(
            impl FixedWidth for $t {
                const BITS: u32 = <$t>::BITS;
                const BYTES: usize = std::mem::size_of::<$t>();

                #[inline(always)]
                fn as_f64(self) -> f64 {
                    self as f64
                }

                #[inline(always)]
                fn prefix(self, bits: u32) -> usize {
                    if bits == 0 {
                        0
                    } else {
                        (self >> (<$t>::BITS - bits)) as usize
                    }
                }
            }
        )*
    }
}

impl_fixed_width!(u32, u64);
