use num::PrimInt;
use serde::{Deserialize, Serialize};

/// A knot of a piecewise linear approximation, mapping a key to its rank in the sorted data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Breakpoint<K> {
    pub key: K,
    pub rank: u64,
}

impl<K: PrimInt> Breakpoint<K> {
    pub fn new(key: K, rank: u64) -> Self {
        Self { key, rank }
    }

    /// Slope of the line connecting this breakpoint to `other`, in ranks per key.
    ///
    /// Keys are subtracted as integers before the conversion to `f64`, so that large keys
    /// which are close together don't lose their difference to rounding.
    pub fn slope_to(&self, other: &Self) -> f64 {
        let run = if other.key >= self.key {
            as_f64(other.key - self.key)
        } else {
            -as_f64(self.key - other.key)
        };
        let rise = other.rank as f64 - self.rank as f64;

        rise / run
    }
}

/// Integer to float conversion. Never fails for primitive integers, it only rounds.
#[inline(always)]
pub(crate) fn as_f64<K: PrimInt>(key: K) -> f64 {
    num::cast::<K, f64>(key).unwrap()
}
